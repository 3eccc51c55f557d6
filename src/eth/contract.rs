//! Multisig wallet contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the wallet
//! contract that holds bridged funds on the EVM side.

use alloy::sol;

sol! {
    /// Multisig swap wallet interface
    #[sol(rpc)]
    contract MultisigSwapWallet {
        /// Submit a withdrawal backed by threshold operator signatures.
        /// The contract recovers each signature over the withdrawal digest
        /// and executes the transfer when enough distinct operators signed.
        function submitWithdrawal(
            address token,
            address recipient,
            uint256 amount,
            uint256 nonce,
            bytes[] signatures
        ) external returns (uint256 transactionId);

        /// Look up a recorded withdrawal submission by its transaction id
        function getSubmission(uint256 transactionId) external view returns (
            uint256 nonce,
            address token
        );

        /// Events
        ///
        /// Deposit of the native coin toward the privacy chain.
        /// `recipient` is the UTF-8 bech32 address on the destination chain.
        event Swap(uint256 nonce, bytes recipient, uint256 amount);

        /// ERC-20 deposit toward the privacy chain.
        event SwapToken(uint256 nonce, bytes recipient, uint256 amount, address token);

        /// A submitted withdrawal executed successfully.
        event Withdraw(uint256 transactionId);

        /// A submitted withdrawal executed and reverted inside the wallet.
        event WithdrawFailure(uint256 transactionId);
    }
}
