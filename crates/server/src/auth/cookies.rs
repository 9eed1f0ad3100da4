//! Cookie names and `Set-Cookie` rendering shared with the browser client.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};

use crate::{auth::jwt::ACCESS_TOKEN_TTL_SECONDS, session::manager::SESSION_TTL_SECONDS};

pub const ACCESS_COOKIE: &str = "ems_at";
pub const REFRESH_COOKIE: &str = "ems_rt";
pub const CSRF_COOKIE: &str = "XSRF-TOKEN";
pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
        }
    }
}

/// Attributes applied to every cookie the server sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookiePolicy {
    pub fn for_environment(production: bool) -> Self {
        if production {
            Self { secure: true, same_site: SameSite::Strict }
        } else {
            Self { secure: false, same_site: SameSite::Lax }
        }
    }

    pub fn access_cookie(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.render(ACCESS_COOKIE, token, ACCESS_TOKEN_TTL_SECONDS, true)
    }

    pub fn refresh_cookie(&self, refresh_token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.render(REFRESH_COOKIE, refresh_token, SESSION_TTL_SECONDS, true)
    }

    /// Not HttpOnly: client script must read it to echo the header.
    pub fn csrf_cookie(&self, csrf_token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        self.render(CSRF_COOKIE, csrf_token, SESSION_TTL_SECONDS, false)
    }

    pub fn clear_cookies(&self) -> Result<[HeaderValue; 3], InvalidHeaderValue> {
        Ok([
            self.render(ACCESS_COOKIE, "", 0, true)?,
            self.render(REFRESH_COOKIE, "", 0, true)?,
            self.render(CSRF_COOKIE, "", 0, false)?,
        ])
    }

    fn render(
        &self,
        name: &str,
        value: &str,
        max_age: i64,
        http_only: bool,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        let same_site = self.same_site.as_str();
        let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age}; SameSite={same_site}");
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

/// Returns the first value of `name` across all `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{read_cookie, CookiePolicy, SameSite};
    use axum::http::{header::COOKIE, HeaderMap};

    #[test]
    fn production_policy_is_secure_and_strict() {
        let policy = CookiePolicy::for_environment(true);
        assert_eq!(policy, CookiePolicy { secure: true, same_site: SameSite::Strict });

        let cookie = policy.access_cookie("tok").expect("cookie should render");
        assert_eq!(
            cookie.to_str().expect("ascii"),
            "ems_at=tok; Path=/; Max-Age=900; SameSite=Strict; HttpOnly; Secure"
        );
    }

    #[test]
    fn development_policy_is_lax_without_secure() {
        let policy = CookiePolicy::for_environment(false);
        let cookie = policy.refresh_cookie("sid:raw").expect("cookie should render");
        assert_eq!(
            cookie.to_str().expect("ascii"),
            "ems_rt=sid:raw; Path=/; Max-Age=604800; SameSite=Lax; HttpOnly"
        );
    }

    #[test]
    fn csrf_cookie_is_script_readable() {
        let cookie = CookiePolicy::for_environment(true)
            .csrf_cookie("csrf123")
            .expect("cookie should render");
        let rendered = cookie.to_str().expect("ascii");
        assert!(rendered.starts_with("XSRF-TOKEN=csrf123;"));
        assert!(rendered.contains("Max-Age=604800"));
        assert!(!rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
    }

    #[test]
    fn clear_cookies_expire_immediately() {
        let cleared = CookiePolicy::for_environment(false).clear_cookies().expect("render");
        for cookie in cleared {
            assert!(cookie.to_str().expect("ascii").contains("Max-Age=0"));
        }
    }

    #[test]
    fn reads_named_cookie_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, "theme=dark; ems_at=abc".parse().expect("header"));
        headers.append(COOKIE, "XSRF-TOKEN=xyz".parse().expect("header"));

        assert_eq!(read_cookie(&headers, "ems_at").as_deref(), Some("abc"));
        assert_eq!(read_cookie(&headers, "XSRF-TOKEN").as_deref(), Some("xyz"));
        assert_eq!(read_cookie(&headers, "ems_rt"), None);
    }

    #[test]
    fn empty_cookie_values_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, "ems_at=; other=1".parse().expect("header"));
        assert_eq!(read_cookie(&headers, "ems_at"), None);
    }

    #[test]
    fn refresh_cookie_value_keeps_colon_separator() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, "ems_rt=0b5c:secret=part".parse().expect("header"));
        assert_eq!(read_cookie(&headers, "ems_rt").as_deref(), Some("0b5c:secret=part"));
    }
}
