// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

/// Failures while decoding a cluster payload.
///
/// These are always local to one frame: the dispatcher logs them and carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload truncated: needed {needed} byte(s) at offset {offset}, payload is {len} byte(s)")]
    Truncated {
        needed: usize,
        offset: usize,
        len: usize,
    },

    #[error("unexpected command byte 0x{command:02x}")]
    UnexpectedCommand { command: u8 },

    #[error("device model unknown, cannot decode model-specific payload")]
    MissingModel,
}

/// All errors that can occur in the bridge library.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Unknown message name: {name}")]
    UnknownMessageName { name: String },

    #[error("Invalid mode: {mode}")]
    InvalidMode { mode: String },

    #[error("Message {message} requires parameter {parameter}")]
    MissingParameter {
        message: &'static str,
        parameter: &'static str,
    },

    #[error("No device known for remote16 {remote16}")]
    AddressResolution { remote16: String },

    #[error("Unknown device: {remote64}")]
    UnknownDevice { remote64: String },

    #[error("Invalid address: {value}")]
    InvalidAddress { value: String },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Frame checksum mismatch")]
    FrameChecksum,

    #[error("Malformed frame: {details}")]
    MalformedFrame { details: String },

    #[error("Duplicate dispatch route: profile {profile_id:04x} cluster {cluster_id:04x} command {command:?}")]
    DuplicateRoute {
        profile_id: u16,
        cluster_id: u16,
        command: Option<u8>,
    },

    #[error("Decoder {decoder} has no dispatch route")]
    UnroutedDecoder { decoder: &'static str },

    #[error("Persistence error: {details}")]
    Persistence { details: String },
}

impl BridgeError {
    /// Whether this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Io(_)
                | BridgeError::Serial(_)
                | BridgeError::TransportClosed
                | BridgeError::ChannelClosed
                | BridgeError::FrameChecksum
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(BridgeError::TransportClosed.is_retryable());
        assert!(BridgeError::FrameChecksum.is_retryable());
        assert!(!BridgeError::UnknownMessageName { name: "x".into() }.is_retryable());
        assert!(!BridgeError::InvalidMode { mode: "turbo".into() }.is_retryable());
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::Truncated { needed: 2, offset: 3, len: 4 };
        assert_eq!(
            err.to_string(),
            "payload truncated: needed 2 byte(s) at offset 3, payload is 4 byte(s)"
        );
        let wrapped: BridgeError = err.into();
        assert!(matches!(wrapped, BridgeError::Decode(_)));
    }
}
