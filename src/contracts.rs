//! ABI bindings for the contracts the treasury engine and bridge executor
//! call directly, declared inline with `sol!` rather than loaded from an
//! external ABI JSON file.

use alloy_primitives::address;
use alloy_sol_types::sol;

/// The batch-disperse contract's CREATE2 address, shared across every chain
/// where it is deployed (`disperse_available`). This is the well-known
/// `disperse.app` contract address.
pub const DISPERSE_CONTRACT_ADDRESS: alloy_primitives::Address = address!("0xD152f549545093347A162Dce210e7293f1452150");

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);
    }
}

/// The batch-disperse contract: deployed at the same address across every
/// chain where `disperse_available` is set (a CREATE2 convention), accepting
/// `(recipients[], amounts[])` and performing N transfers in one call.
sol! {
    #[sol(rpc)]
    interface IDisperse {
        function disperseEther(address[] recipients, uint256[] values) external payable;
        function disperseToken(address token, address[] recipients, uint256[] values) external;
    }
}
