use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::quota::UsageStats;

/// Public view of the authenticated caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl From<AuthUser> for UserInfo {
    fn from(user: AuthUser) -> Self {
        Self {
            id: user.sub,
            username: user.username,
            avatar_url: user.avatar_url,
        }
    }
}

/// Response of `GET /api/auth/me`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeResponse {
    pub user: UserInfo,
    pub usage: UsageStats,
}
