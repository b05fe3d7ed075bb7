//! Solidity types of the limit order protocol, escrow factory and resolver

use alloy_sol_types::sol;

sol! {
    /// Limit order protocol v4 order, as hashed for EIP-712
    #[derive(Debug, PartialEq, Eq)]
    struct Order {
        uint256 salt;
        address maker;
        address receiver;
        address makerAsset;
        address takerAsset;
        uint256 makingAmount;
        uint256 takingAmount;
        uint256 makerTraits;
    }

    /// Same order in calldata form (`Address` is a uint256 user type on-chain)
    #[derive(Debug, PartialEq, Eq)]
    struct OrderArgs {
        uint256 salt;
        uint256 maker;
        uint256 receiver;
        uint256 makerAsset;
        uint256 takerAsset;
        uint256 makingAmount;
        uint256 takingAmount;
        uint256 makerTraits;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Immutables {
        bytes32 orderHash;
        bytes32 hashlock;
        uint256 maker;
        uint256 taker;
        uint256 token;
        uint256 amount;
        uint256 safetyDeposit;
        uint256 timelocks;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct DstImmutablesComplement {
        uint256 maker;
        uint256 amount;
        uint256 token;
        uint256 safetyDeposit;
        uint256 chainId;
    }

    function deploySrc(
        Immutables immutables,
        OrderArgs order,
        bytes32 r,
        bytes32 vs,
        uint256 amount,
        uint256 takerTraits,
        bytes args
    ) external payable;

    function deployDst(Immutables dstImmutables, uint256 srcCancellationTimestamp) external payable;

    function withdraw(address escrow, bytes32 secret, Immutables immutables) external;

    function cancel(address escrow, Immutables immutables) external;

    function approve(address spender, uint256 amount) external returns (bool);

    event SrcEscrowCreated(Immutables srcImmutables, DstImmutablesComplement dstImmutablesComplement);

    event DstEscrowCreated(address escrow, bytes32 hashlock, uint256 taker);
}
