use thiserror::Error;

#[derive(Error, Debug)]
pub enum VidLinkError {
    #[error("Configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },
}

// MARK: - DirectoryError

/// Failures talking to the discovery server.
///
/// `WrongPassword` and `UserUnknown` are application-level answers from the
/// server, not transport failures; callers surface them to the user.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Not connected to the directory server")]
    NotConnected,

    #[error("Wrong password")]
    WrongPassword,

    #[error("User unknown")]
    UserUnknown,

    #[error("Directory server did not answer")]
    NoResponse,

    #[error("Malformed directory response: {response:?}")]
    Malformed { response: String },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// MARK: - CallError

/// Result codes of call-control operations.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Already connected to {peer}")]
    AlreadyConnected { peer: String },

    #[error("Not in a call")]
    NotInCall,

    #[error("User {nick} is not registered")]
    PeerNotFound { nick: String },

    #[error("Could not reach {addr}: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("Peer is busy in another call")]
    Busy,

    #[error("Peer denied the call")]
    Denied,

    #[error("Peer did not answer within {secs}s")]
    NoAnswer { secs: u64 },

    #[error("Peer closed the control connection")]
    PeerClosed,

    #[error("Malformed control message: {response:?}")]
    Malformed { response: String },

    #[error("Call hold state already set (held={held})")]
    AlreadyInState { held: bool },

    #[error("Directory lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// MARK: - MediaError

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Partial send: {sent} of {expected} bytes")]
    PartialSend { sent: usize, expected: usize },

    #[error("Datagram too large: {len} bytes")]
    DatagramTooLarge { len: usize },

    #[error("Malformed media header: {reason}")]
    MalformedHeader { reason: String },

    #[error("Codec failure: {reason}")]
    Codec { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
