use serde::{Deserialize, Serialize};

// User identity = caller-chosen stable string (e.g. an e-mail address).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One device connection slot: the compound `user:device` pair.
///
/// At most one session per pair may be active at a time; the server enforces
/// this during the session-registration phase of the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddr {
    pub user_id: UserId,
    pub device_id: String,
}

impl DeviceAddr {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            device_id: device_id.into(),
        }
    }

    /// Parse the `user:device` wire form. The device id may not be empty.
    pub fn parse(s: &str) -> Option<Self> {
        let (user, device) = s.split_once(':')?;
        if user.is_empty() || device.is_empty() {
            return None;
        }
        Some(Self::new(user, device))
    }

    /// Filesystem-safe form used for per-device data directories.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.user_id, self.device_id)
    }
}

impl std::fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.user_id, self.device_id)
    }
}

/// Result codes carried on protocol responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    OkNewUser,
    OkUser,
    OkDevId,
    OkTested,
    Nok,
    NokDevId,
    NokTested,
    Error,
    NoDomain,
    NoUser,
    NoPerm,
    NoId,
    NoData,
}

impl ResultCode {
    pub fn is_ok(self) -> bool {
        matches!(
            self,
            ResultCode::Ok
                | ResultCode::OkNewUser
                | ResultCode::OkUser
                | ResultCode::OkDevId
                | ResultCode::OkTested
        )
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResultCode::Ok => "OK",
            ResultCode::OkNewUser => "OK_NEW_USER",
            ResultCode::OkUser => "OK_USER",
            ResultCode::OkDevId => "OK_DEVID",
            ResultCode::OkTested => "OK_TESTED",
            ResultCode::Nok => "NOK",
            ResultCode::NokDevId => "NOK_DEVID",
            ResultCode::NokTested => "NOK_TESTED",
            ResultCode::Error => "ERROR",
            ResultCode::NoDomain => "NO_DM",
            ResultCode::NoUser => "NO_USER",
            ResultCode::NoPerm => "NO_PERM",
            ResultCode::NoId => "NO_ID",
            ResultCode::NoData => "NO_DATA",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_addr_parse() {
        let addr = DeviceAddr::parse("alice:phone1").unwrap();
        assert_eq!(addr.user_id.as_str(), "alice");
        assert_eq!(addr.device_id, "phone1");
        assert_eq!(addr.to_string(), "alice:phone1");
    }

    #[test]
    fn test_device_addr_parse_rejects_malformed() {
        assert!(DeviceAddr::parse("no-separator").is_none());
        assert!(DeviceAddr::parse("alice:").is_none());
        assert!(DeviceAddr::parse(":phone1").is_none());
    }

    #[test]
    fn test_dir_name_is_filesystem_safe() {
        let addr = DeviceAddr::new("alice", "phone1");
        assert_eq!(addr.dir_name(), "alice_phone1");
        assert!(!addr.dir_name().contains(':'));
    }

    #[test]
    fn test_result_code_wire_names() {
        assert_eq!(ResultCode::NoDomain.to_string(), "NO_DM");
        assert_eq!(ResultCode::OkNewUser.to_string(), "OK_NEW_USER");
        assert!(ResultCode::OkTested.is_ok());
        assert!(!ResultCode::NokTested.is_ok());
    }
}
