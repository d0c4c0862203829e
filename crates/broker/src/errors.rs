#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("invalid_username")]
    InvalidUsername,
    #[error("username_taken")]
    UsernameTaken,
}

impl RegisterError {
    pub fn reason(&self) -> &'static str {
        match self {
            RegisterError::InvalidUsername => "invalid_username",
            RegisterError::UsernameTaken => "username_taken",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("unknown_username")]
    UnknownUsername,
    #[error("server_offline")]
    ServerOffline,
}

impl ConnectError {
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectError::UnknownUsername => "unknown_username",
            ConnectError::ServerOffline => "server_offline",
        }
    }
}
