use sha2::{Digest, Sha256};

/// Access-gate states over the current session identity. `Unknown` only
/// exists before a workspace is selected, when the configured admin address
/// cannot be read yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unknown,
    Unauthenticated,
    NonAdmin,
    Admin,
}

impl GateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Unauthenticated => "unauthenticated",
            Self::NonAdmin => "nonAdmin",
            Self::Admin => "admin",
        }
    }

    /// The route the UI should render for this state. Only the admin sees
    /// the dashboard; everyone else gets the public form with its login
    /// prompt.
    pub fn route(self) -> &'static str {
        match self {
            Self::Admin => "/admin",
            _ => "/",
        }
    }
}

/// Gate evaluation: identity absent → Unauthenticated; identity equal to the
/// configured admin address (case-insensitive) → Admin; anything else →
/// NonAdmin, which callers must treat as "sign out immediately".
pub fn evaluate(identity: Option<&str>, admin_email: Option<&str>) -> GateState {
    let Some(admin) = admin_email else {
        return GateState::Unknown;
    };
    match identity {
        None => GateState::Unauthenticated,
        Some(email) if email.eq_ignore_ascii_case(admin) => GateState::Admin,
        Some(_) => GateState::NonAdmin,
    }
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex_digest(&hasher.finalize())
}

pub fn verify_password(salt: &str, password: &str, expected_hash: &str) -> bool {
    hash_password(salt, password) == expected_hash
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
