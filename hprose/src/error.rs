use std::{any::Any, backtrace::Backtrace};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    WrongRequest,
    MethodNotFound,
    DecodeFailed,
    EncodeFailed,
    /// Error returned by a registered function.
    Invoke,
    /// A panic caught by a fault boundary.
    Panic,
    /// An event callback refused to let the flow continue.
    Rejected,
    TcpConnectFailed,
    TcpBindFailed,
    TcpAcceptFailed,
    TcpRecvFailed,
    TcpSendFailed,
    TcpParseMsgFailed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
    /// Call stack captured when a panic was converted into this error.
    pub stack: Option<String>,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            stack: None,
        }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
            stack: None,
        }
    }

    /// Shorthand for an error returned by a registered function.
    #[must_use]
    pub fn invoke(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invoke, msg)
    }

    /// Converts a panic payload into a structured error.
    ///
    /// The stack is the one recorded at the panic site by the
    /// [`fault`](crate::fault) hook, or the current one when none was
    /// recorded.
    #[must_use]
    pub fn panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(e) = payload.downcast_ref::<Error>() {
            e.msg.clone()
        } else {
            "unknown panic".to_string()
        };
        Self {
            kind: ErrorKind::Panic,
            msg,
            stack: Some(
                crate::fault::take_panic_stack()
                    .unwrap_or_else(Backtrace::force_capture)
                    .to_string(),
            ),
        }
    }

    #[must_use]
    pub fn is_panic(&self) -> bool {
        self.kind == ErrorKind::Panic
    }

    /// The text sent to the client. Debug mode appends the captured stack of
    /// panic errors.
    #[must_use]
    pub fn wire_message(&self, debug: bool) -> String {
        let msg = if self.msg.is_empty() {
            format!("{:?}", self.kind)
        } else {
            self.msg.clone()
        };
        match &self.stack {
            Some(stack) if debug => format!("{msg}\r\n{stack}"),
            _ => msg,
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self::new(ErrorKind::InvalidArgument, value.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::new(ErrorKind::DecodeFailed, value.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
