//! Solidity surface the adapter talks to. Call encoding only; transport
//! lives in [`crate::provider`].

use alloy_sol_macro::sol;

sol! {
    /// Matches the on-chain `PoolKey` layout; hashing it yields the pool id.
    struct PoolKey {
        address currency0;
        address currency1;
        uint24 fee;
        int24 tickSpacing;
        address hooks;
    }

    struct PositionInfo {
        PoolKey key;
        int24 tickLower;
        int24 tickUpper;
        uint128 liquidity;
    }

    interface IStateView {
        function getSlot0(bytes32 poolId)
            external
            view
            returns (uint160 sqrtPriceX96, int24 tick, uint24 protocolFee, uint24 lpFee);
        function getLiquidity(bytes32 poolId) external view returns (uint128 liquidity);
        function getFeeGrowthGlobals(bytes32 poolId)
            external
            view
            returns (uint256 feeGrowthGlobal0, uint256 feeGrowthGlobal1);
    }

    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }

    interface IVault {
        function balance() external view returns (uint256);
    }

    /// The agent's on-chain manager: custodies both sides, executes
    /// deposits, withdrawals, swaps and arbitrary bridge calls.
    interface ILiquidityManager {
        event Deposit(address indexed sender, uint256 amount0, uint256 amount1, uint128 liquidity);

        function deposit(
            PoolKey key,
            int24 tickLower,
            int24 tickUpper,
            uint256 ethAmount,
            uint256 usdcAmount
        ) external;
        function withdraw(PoolKey key, int24 tickLower, int24 tickUpper, uint128 liquidity)
            external;
        function withdrawFromVault(uint256 amount) external;
        function swapEthForToken(uint256 amountIn, uint256 minAmountOut) external;
        function swapTokenForEth(uint256 amountIn, uint256 minAmountOut) external;
        function execute(address target, uint256 value, bytes data) external;
        function getPositions() external view returns (PositionInfo[] positions);
    }

    interface IQuoter {
        struct QuoteExactSingleParams {
            PoolKey poolKey;
            bool zeroForOne;
            uint128 exactAmount;
            bytes hookData;
        }

        function quoteExactInputSingle(QuoteExactSingleParams params)
            external
            returns (uint256 amountOut, uint256 gasEstimate);
    }
}
