use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Cleartext credentials: one shared password for guest-facing clients and a
/// separate one for the staff (admin) user.
#[derive(Debug, Clone)]
pub struct CoversAuthSource {
    password: String,
    admin_user: String,
    admin_password: String,
}

impl CoversAuthSource {
    pub fn new(password: String, admin_user: String, admin_password: String) -> Self {
        Self {
            password,
            admin_user,
            admin_password,
        }
    }

    pub fn is_admin(&self, user: Option<&str>) -> bool {
        user == Some(self.admin_user.as_str())
    }

    fn password_for(&self, user: Option<&str>) -> &str {
        if self.is_admin(user) {
            &self.admin_password
        } else {
            &self.password
        }
    }
}

#[async_trait]
impl AuthSource for CoversAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password_for(login.user()).as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_gets_its_own_password() {
        let auth = CoversAuthSource::new("guest-pw".into(), "staff".into(), "staff-pw".into());
        assert!(auth.is_admin(Some("staff")));
        assert!(!auth.is_admin(Some("guest")));
        assert!(!auth.is_admin(None));
        assert_eq!(auth.password_for(Some("staff")), "staff-pw");
        assert_eq!(auth.password_for(Some("anyone")), "guest-pw");
        assert_eq!(auth.password_for(None), "guest-pw");
    }
}
