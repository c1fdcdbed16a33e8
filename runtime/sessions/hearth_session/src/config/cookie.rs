use biscotti::SameSite;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the cookie used to carry the session ID on the client-side.
pub struct SessionCookieConfig {
    /// The name of the cookie used to store the session ID.
    ///
    /// By default, the name is set to `sid`.
    #[serde(default = "default_session_cookie_name")]
    pub name: String,
    /// Set the `Domain` attribute on the cookie used to store the session ID.
    ///
    /// By default, the attribute is not set.
    #[serde(default)]
    pub domain: Option<String>,
    /// Set the `Path` attribute on the cookie used to store the session ID.
    ///
    /// By default, the attribute is set to `/`.
    #[serde(default = "default_session_cookie_path")]
    pub path: Option<String>,
    /// Set the `Secure` attribute on the cookie used to store the session ID.
    ///
    /// If the cookie is marked as `Secure`, it will only be transmitted when the connection is secure (e.g. over HTTPS).
    ///
    /// Default is `false`.
    #[serde(default)]
    pub secure: bool,
    /// Set the `HttpOnly` attribute on the cookie used to store the session ID.
    ///
    /// If the cookie is marked as `HttpOnly`, it will not be visible to JavaScript
    /// snippets running in the browser.
    ///
    /// Default is `true`.
    #[serde(default = "default_session_cookie_http_only")]
    pub http_only: bool,
    /// Set the [`SameSite`] attribute on the cookie used to store the session ID.
    ///
    /// By default, the attribute is set to [`SameSite::Lax`].
    #[serde(default = "default_session_cookie_same_site")]
    #[serde(with = "same_site")]
    pub same_site: SameSite,
}

impl Default for SessionCookieConfig {
    fn default() -> Self {
        Self {
            name: default_session_cookie_name(),
            domain: None,
            path: default_session_cookie_path(),
            secure: false,
            http_only: default_session_cookie_http_only(),
            same_site: default_session_cookie_same_site(),
        }
    }
}

fn default_session_cookie_name() -> String {
    "sid".to_string()
}

fn default_session_cookie_http_only() -> bool {
    true
}

fn default_session_cookie_same_site() -> SameSite {
    SameSite::Lax
}

fn default_session_cookie_path() -> Option<String> {
    Some("/".to_string())
}

// Deserialization and serialization routines for the `same_site` attribute.
mod same_site {
    use biscotti::SameSite;
    use serde::{Deserializer, Serializer, de};
    use std::fmt;

    pub fn serialize<S>(value: &SameSite, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let value = match value {
            SameSite::Strict => "strict",
            SameSite::Lax => "lax",
            SameSite::None => "none",
        };
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SameSite, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SameSiteVisitor;

        impl de::Visitor<'_> for SameSiteVisitor {
            type Value = SameSite;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("one of `strict`, `lax` or `none`")
            }

            fn visit_str<E>(self, value: &str) -> Result<SameSite, E>
            where
                E: de::Error,
            {
                match value {
                    "Strict" | "strict" => Ok(SameSite::Strict),
                    "Lax" | "lax" => Ok(SameSite::Lax),
                    "None" | "none" => Ok(SameSite::None),
                    _ => Err(de::Error::unknown_variant(
                        value,
                        &["strict", "lax", "none"],
                    )),
                }
            }
        }

        deserializer.deserialize_str(SameSiteVisitor)
    }
}
