use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tidepool_types::{
    chain::ChainId,
    observation::PoolObservation,
    primitive::{price_from_sqrt_x96, u256_to_f64}
};

/// Julian-year seconds, the annualization basis for every APR.
pub const SECONDS_PER_YEAR: f64 = 31_557_600.0;

/// Minimum span between the endpoints of a window before an APR is
/// meaningful.
const MIN_WINDOW_SPAN_SECS: f64 = 60.0;

/// USDC has 6 decimals; capital per unit L is in token1 raw units.
const MICRO_USD: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Window {
    ThirtyMin,
    FourHour,
    /// Runs 25 hours on purpose, margin over a calendar day of samples.
    OneDay
}

impl Window {
    pub fn duration(&self) -> Duration {
        match self {
            Self::ThirtyMin => Duration::minutes(30),
            Self::FourHour => Duration::hours(4),
            Self::OneDay => Duration::hours(25)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ThirtyMin => "30min",
            Self::FourHour => "4hr",
            Self::OneDay => "1day"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeAprWindow {
    pub fee_apr:            f64,
    pub liquidity_usd:      f64,
    pub time_delta_seconds: f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolatilityWindow {
    /// Coefficient of variation, the one number downstream consumers use.
    pub price_volatility:   f64,
    pub min_price:          f64,
    pub max_price:          f64,
    pub price_range:        f64,
    pub standard_deviation: f64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainMetrics {
    pub chain_id:          ChainId,
    pub observation_count: usize,
    pub latest:            Option<DateTime<Utc>>,
    pub apr_30min:         Option<FeeAprWindow>,
    pub apr_4hr:           Option<FeeAprWindow>,
    pub apr_1day:          Option<FeeAprWindow>,
    pub volatility_30min:  Option<VolatilityWindow>,
    pub volatility_4hr:    Option<VolatilityWindow>,
    pub volatility_1day:   Option<VolatilityWindow>
}

impl ChainMetrics {
    /// The APR the scorer consumes: 4 h preferred, 30 m as the fresh
    /// fallback, 1 d as the stale one.
    pub fn best_fee_apr(&self) -> Option<f64> {
        self.apr_4hr
            .or(self.apr_30min)
            .or(self.apr_1day)
            .map(|w| w.fee_apr)
    }

    pub fn best_volatility(&self) -> Option<f64> {
        self.volatility_4hr
            .or(self.volatility_30min)
            .or(self.volatility_1day)
            .map(|w| w.price_volatility)
    }
}

/// Computes every window for one chain from its ascending observation
/// history. Rows after `now` are ignored, which keeps already-computed
/// windows stable under append.
pub fn compute_metrics(
    chain_id: ChainId,
    observations: &[PoolObservation],
    now: DateTime<Utc>
) -> ChainMetrics {
    let in_range: Vec<&PoolObservation> =
        observations.iter().filter(|o| o.timestamp <= now).collect();

    let windowed = |window: Window| {
        let start = now - window.duration();
        in_range
            .iter()
            .filter(|o| o.timestamp >= start)
            .copied()
            .collect::<Vec<_>>()
    };

    let w30 = windowed(Window::ThirtyMin);
    let w4h = windowed(Window::FourHour);
    let w1d = windowed(Window::OneDay);

    ChainMetrics {
        chain_id,
        observation_count: in_range.len(),
        latest: in_range.last().map(|o| o.timestamp),
        apr_30min: fee_apr(&w30),
        apr_4hr: fee_apr(&w4h),
        apr_1day: fee_apr(&w1d),
        volatility_30min: volatility(&w30),
        volatility_4hr: volatility(&w4h),
        volatility_1day: volatility(&w1d)
    }
}

/// Fee APR between the oldest and newest usable observations of a window.
///
/// Rows still carrying the all-zero fee-growth default are skipped; the
/// full-range capital approximation `2·sqrt(P)` is the agreed cross-chain
/// comparison basis.
pub fn fee_apr(window: &[&PoolObservation]) -> Option<FeeAprWindow> {
    let usable: Vec<&&PoolObservation> = window
        .iter()
        .filter(|o| !(o.fee_growth_global0.is_zero() && o.fee_growth_global1.is_zero()))
        .collect();
    if usable.len() < 2 {
        return None
    }

    let oldest = *usable.first()?;
    let newest = *usable.last()?;
    let dt = (newest.timestamp - oldest.timestamp).num_milliseconds() as f64 / 1000.0;
    if dt < MIN_WINDOW_SPAN_SECS {
        return None
    }

    // accumulators are modular on chain, diff them the same way
    let dg0 = u256_to_f64(newest.fee_growth_global0.wrapping_sub(oldest.fee_growth_global0)) /
        2f64.powi(128);
    let dg1 = u256_to_f64(newest.fee_growth_global1.wrapping_sub(oldest.fee_growth_global1)) /
        2f64.powi(128);
    if dg0 == 0.0 && dg1 == 0.0 {
        return None
    }

    let price = price_from_sqrt_x96(newest.sqrt_price_x96);
    let capital_per_liquidity = 2.0 * price.sqrt();
    if capital_per_liquidity == 0.0 {
        return None
    }

    let fee_per_liquidity = dg0 * price + dg1;
    let fee_apr = (fee_per_liquidity / capital_per_liquidity) / dt * SECONDS_PER_YEAR;
    let liquidity_usd = newest.liquidity as f64 * capital_per_liquidity / MICRO_USD;

    Some(FeeAprWindow { fee_apr, liquidity_usd, time_delta_seconds: dt })
}

/// Spread statistics over the window's human prices (USDC per ETH).
pub fn volatility(window: &[&PoolObservation]) -> Option<VolatilityWindow> {
    if window.len() < 2 {
        return None
    }

    let prices: Vec<f64> = window
        .iter()
        .map(|o| price_from_sqrt_x96(o.sqrt_price_x96) * 1e12)
        .collect();

    let min = prices.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    if mean == 0.0 {
        return None
    }

    let variance =
        prices.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / prices.len() as f64;
    let stddev = variance.sqrt();

    Some(VolatilityWindow {
        price_volatility:   stddev / mean,
        min_price:          min,
        max_price:          max,
        price_range:        max - min,
        standard_deviation: stddev
    })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};
    use chrono::TimeZone;

    use super::*;

    /// sqrtPriceX96 for a target raw price, good to f64 precision.
    fn sqrt_price_x96(price: f64) -> U256 {
        U256::from((price.sqrt() * 2f64.powi(96)) as u128)
    }

    fn observation(
        ts: DateTime<Utc>,
        price: f64,
        liquidity: u128,
        g0: U256,
        g1: U256
    ) -> PoolObservation {
        PoolObservation {
            timestamp: ts,
            chain_id: 8453,
            pool_address: Address::repeat_byte(0x42),
            sqrt_price_x96: sqrt_price_x96(price),
            tick: 0,
            liquidity,
            fee: 500,
            fee_growth_global0: g0,
            fee_growth_global1: g1
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, h, m, 0).unwrap()
    }

    #[test]
    fn fee_apr_matches_the_reference_formula() {
        // 4h of growth at fixed price P = 2e9, final liquidity 1e18
        let g = U256::from(7u64) << 130;
        let h = U256::from(11u64) << 131;
        let dg0_raw = U256::from(1u64) << 128; // normalizes to 1.0
        let dg1_raw = U256::from(3u64) << 128; // normalizes to 3.0

        let rows = vec![
            observation(at(8, 0), 2e9, 5, g, h),
            observation(at(12, 0), 2e9, 10u128.pow(18), g + dg0_raw, h + dg1_raw),
        ];
        let refs: Vec<&PoolObservation> = rows.iter().collect();
        let result = fee_apr(&refs).expect("window is computable");

        let price = price_from_sqrt_x96(rows[1].sqrt_price_x96);
        let capital = 2.0 * price.sqrt();
        let dt = 14_400.0;
        let expected = ((1.0 * price + 3.0) / capital) / dt * SECONDS_PER_YEAR;

        assert!((result.fee_apr - expected).abs() <= 1e-9 * expected.abs());
        assert_eq!(result.time_delta_seconds, dt);

        let expected_liquidity_usd = 1e18 * capital / 1e6;
        assert!(
            (result.liquidity_usd - expected_liquidity_usd).abs() <=
                1e-9 * expected_liquidity_usd
        );
    }

    #[test]
    fn zero_growth_rows_are_skipped() {
        let g = U256::from(5u64) << 128;
        let rows = vec![
            observation(at(8, 0), 2e9, 10, U256::ZERO, U256::ZERO),
            observation(at(9, 0), 2e9, 10, g, g),
            observation(at(10, 0), 2e9, 10, g + (U256::from(1u64) << 128), g),
        ];
        let refs: Vec<&PoolObservation> = rows.iter().collect();
        let result = fee_apr(&refs).expect("two usable rows remain");
        // the zero row must not be the oldest endpoint
        assert_eq!(result.time_delta_seconds, 3600.0);
    }

    #[test]
    fn apr_needs_two_usable_points_and_a_minute_of_span() {
        let g = U256::from(5u64) << 128;
        let single = vec![observation(at(8, 0), 2e9, 10, g, g)];
        let refs: Vec<&PoolObservation> = single.iter().collect();
        assert!(fee_apr(&refs).is_none());

        let narrow = vec![
            observation(at(8, 0), 2e9, 10, g, g),
            observation(at(8, 0) + Duration::seconds(30), 2e9, 10, g + g, g),
        ];
        let refs: Vec<&PoolObservation> = narrow.iter().collect();
        assert!(fee_apr(&refs).is_none());
    }

    #[test]
    fn equal_endpoints_yield_no_apr() {
        let g = U256::from(5u64) << 128;
        let rows = vec![
            observation(at(8, 0), 2e9, 10, g, g),
            observation(at(9, 0), 2e9, 10, g, g),
        ];
        let refs: Vec<&PoolObservation> = rows.iter().collect();
        assert!(fee_apr(&refs).is_none());
    }

    #[test]
    fn volatility_reports_spread_and_cv() {
        let g = U256::from(5u64) << 128;
        let rows = vec![
            observation(at(8, 0), 2e-3, 10, g, g),
            observation(at(9, 0), 3e-3, 10, g, g),
            observation(at(10, 0), 4e-3, 10, g, g),
        ];
        let refs: Vec<&PoolObservation> = rows.iter().collect();
        let vol = volatility(&refs).expect("three prices");

        // prices scale to human terms by 1e12
        assert!((vol.min_price - 2e9).abs() / 2e9 < 1e-6);
        assert!((vol.max_price - 4e9).abs() / 4e9 < 1e-6);
        assert!((vol.price_range - 2e9).abs() / 2e9 < 1e-4);
        assert!(vol.price_volatility > 0.0);
        assert!(
            (vol.price_volatility - vol.standard_deviation / 3e9).abs() /
                vol.price_volatility <
                1e-4
        );
    }

    #[test]
    fn windows_are_stable_under_later_appends() {
        let g = U256::from(5u64) << 128;
        let now = at(12, 0);
        let mut rows = vec![
            observation(at(8, 30), 2e9, 10, g, g),
            observation(at(11, 0), 2e9, 10, g + (U256::from(1u64) << 128), g),
        ];
        let before = compute_metrics(8453, &rows, now);

        // a row landing after `now` must not disturb the closed window
        rows.push(observation(at(12, 30), 9e9, 99, g + (U256::from(9u64) << 128), g));
        let after = compute_metrics(8453, &rows, now);

        assert_eq!(before, after);
    }

    #[test]
    fn window_assignment_respects_durations() {
        let g = U256::from(5u64) << 128;
        let now = at(12, 0);
        let rows = vec![
            // 20h old: only the 1-day window sees it
            observation(Utc.with_ymd_and_hms(2026, 6, 30, 16, 0, 0).unwrap(), 2e9, 10, g, g),
            // 2h old: 4h and 1d windows
            observation(at(10, 0), 2e9, 10, g + (U256::from(1u64) << 128), g),
            // 10min old: every window
            observation(at(11, 50), 2e9, 10, g + (U256::from(2u64) << 128), g),
        ];
        let metrics = compute_metrics(8453, &rows, now);

        assert!(metrics.apr_30min.is_none(), "single row in 30min window");
        let apr4 = metrics.apr_4hr.expect("two rows inside 4h");
        assert_eq!(apr4.time_delta_seconds, 6600.0);
        let apr1d = metrics.apr_1day.expect("all rows inside 25h");
        assert_eq!(apr1d.time_delta_seconds, 71_400.0);
        assert_eq!(metrics.observation_count, 3);
    }

    #[test]
    fn fallback_order_is_4h_then_30m_then_1d() {
        let window = FeeAprWindow { fee_apr: 0.25, liquidity_usd: 1.0, time_delta_seconds: 60.0 };
        let metrics = ChainMetrics {
            chain_id:          8453,
            observation_count: 0,
            latest:            None,
            apr_30min:         Some(FeeAprWindow { fee_apr: 0.5, ..window }),
            apr_4hr:           None,
            apr_1day:          Some(FeeAprWindow { fee_apr: 0.9, ..window }),
            volatility_30min:  None,
            volatility_4hr:    None,
            volatility_1day:   None
        };
        assert_eq!(metrics.best_fee_apr(), Some(0.5));
    }
}
