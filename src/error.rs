use displaydoc::Display;
use thiserror::Error;

/// SDK-level errors surfaced to callers and stored in connection state.
/// The display strings are the exact user-facing messages; UI layers are
/// expected to present them verbatim.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Please connect your wallet!
    WalletNotConnected,
    /// You rejected the transaction!
    UserRejected,
    /// Please click the metamask extension to sign in!
    ConnectRejected,
    /// Please click the metamask extension to sign in!
    AlreadyProcessing,
    /// Something went wrong!
    ConnectFailed,
    /// Failed to get proxy address for tenant {0}
    ProxyLookup(String),
    /// {0}
    Rpc(String),
}

/// Classifies a failure from a contract call.
///
/// Mirrors the behavior of the original factory error handler: a missing
/// signer wins over whatever the underlying library reported, a wallet
/// rejection (EIP-1193 code 4001) becomes [`Error::UserRejected`], and
/// everything else propagates verbatim as [`Error::Rpc`].
pub fn classify_call_error(has_signer: bool, err: impl std::fmt::Display) -> Error {
    if !has_signer {
        return Error::WalletNotConnected;
    }
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if message.contains("4001") || lowered.contains("user rejected") || lowered.contains("user denied")
    {
        return Error::UserRejected;
    }
    Error::Rpc(message)
}

/// Classifies a failure from the wallet connect flow.
/// Three categories are recognized: user-rejected, already-processing, and
/// unknown. The first two share the metamask prompt message.
pub fn classify_connect_error(err: impl std::fmt::Display) -> Error {
    let lowered = err.to_string().to_lowercase();
    if lowered.contains("user rejected") {
        Error::ConnectRejected
    } else if lowered.contains("already processing") {
        Error::AlreadyProcessing
    } else {
        Error::ConnectFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_signer_wins_over_underlying_error() {
        let err = classify_call_error(false, "server returned an error response");
        assert_eq!(err, Error::WalletNotConnected);
        assert_eq!(err.to_string(), "Please connect your wallet!");
    }

    #[test]
    fn code_4001_is_a_rejection() {
        let err = classify_call_error(true, "error code 4001: User denied transaction signature");
        assert_eq!(err, Error::UserRejected);
        assert_eq!(err.to_string(), "You rejected the transaction!");
    }

    #[test]
    fn other_call_errors_pass_through_verbatim() {
        let err = classify_call_error(true, "execution reverted: tribe does not exist");
        assert_eq!(
            err,
            Error::Rpc("execution reverted: tribe does not exist".into())
        );
    }

    #[test]
    fn connect_rejection_gets_the_metamask_prompt() {
        let err = classify_connect_error("User Rejected the request");
        assert_eq!(err, Error::ConnectRejected);
        assert_eq!(
            err.to_string(),
            "Please click the metamask extension to sign in!"
        );
    }

    #[test]
    fn already_processing_gets_the_metamask_prompt() {
        let err = classify_connect_error("Already processing eth_requestAccounts");
        assert_eq!(err, Error::AlreadyProcessing);
        assert_eq!(
            err.to_string(),
            "Please click the metamask extension to sign in!"
        );
    }

    #[test]
    fn unknown_connect_errors_get_the_generic_message() {
        let err = classify_connect_error("socket hang up");
        assert_eq!(err, Error::ConnectFailed);
        assert_eq!(err.to_string(), "Something went wrong!");
    }
}
