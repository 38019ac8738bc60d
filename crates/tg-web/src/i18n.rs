//! Localized user-facing messages.
//!
//! A small static catalog with key-based lookup and a locale fallback chain:
//! explicit `lang` parameter first, then `Accept-Language`, then English.
//! Templates interpolate `{name}` placeholders.

use axum::{extract::FromRequestParts, http::request::Parts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    En,
    Zh,
}

impl Locale {
    fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        let primary = tag.split(['-', '_', ';']).next().unwrap_or("");
        match primary {
            "en" => Some(Locale::En),
            "zh" => Some(Locale::Zh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    InvalidArgument,
    InvalidSessionId,
    LoadSession,
    ConnectServer,
    NoPerm,
    BadRequest,
    Internal,
    SessionEnd,
}

fn template(locale: Locale, key: MessageKey) -> &'static str {
    use MessageKey::*;
    match locale {
        Locale::En => match key {
            InvalidArgument => "invalid argument: {err}",
            InvalidSessionId => "invalid session id {session_id}",
            LoadSession => "failed to load session: {err}",
            ConnectServer => "failed to connect server: {err}",
            NoPerm => "no permission to {perm}",
            BadRequest => "bad request: {err}",
            Internal => "internal server error",
            SessionEnd => "session {session_id} ended",
        },
        Locale::Zh => match key {
            InvalidArgument => "参数错误: {err}",
            InvalidSessionId => "无效的会话 {session_id}",
            LoadSession => "加载会话失败: {err}",
            ConnectServer => "连接服务失败: {err}",
            NoPerm => "没有权限{perm}",
            BadRequest => "请求错误: {err}",
            Internal => "服务器内部错误",
            SessionEnd => "会话 {session_id} 已结束",
        },
    }
}

/// The caller's resolved locale preference.
#[derive(Debug, Clone)]
pub struct Lang {
    locale: Locale,
}

impl Default for Lang {
    fn default() -> Self {
        Self { locale: Locale::En }
    }
}

impl Lang {
    /// Resolve from the `lang` query/form parameter and the
    /// `Accept-Language` header, in that precedence.
    pub fn from_parts(lang_param: Option<&str>, accept_language: Option<&str>) -> Self {
        let locale = lang_param
            .and_then(Locale::from_tag)
            .or_else(|| {
                accept_language.and_then(|header| header.split(',').find_map(Locale::from_tag))
            })
            .unwrap_or(Locale::En);
        Self { locale }
    }

    pub fn localize(&self, key: MessageKey, args: &[(&str, &str)]) -> String {
        let mut message = template(self.locale, key).to_string();
        for (name, value) in args {
            message = message.replace(&format!("{{{name}}}"), value);
        }
        message
    }
}

impl<S> FromRequestParts<S> for Lang
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let lang_param = parts.uri.query().and_then(|query| {
            query.split('&').find_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                (key == "lang").then_some(value)
            })
        });
        let accept = parts
            .headers
            .get("accept-language")
            .and_then(|v| v.to_str().ok());
        Ok(Lang::from_parts(lang_param, accept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lang_param_wins_over_header() {
        let lang = Lang::from_parts(Some("zh"), Some("en-US,en;q=0.9"));
        assert_eq!(lang.localize(MessageKey::Internal, &[]), "服务器内部错误");
    }

    #[test]
    fn header_is_used_when_param_absent() {
        let lang = Lang::from_parts(None, Some("zh-CN,zh;q=0.9,en;q=0.8"));
        assert_eq!(
            lang.localize(MessageKey::SessionEnd, &[("session_id", "abc")]),
            "会话 abc 已结束"
        );
    }

    #[test]
    fn unknown_tags_fall_back_to_english() {
        let lang = Lang::from_parts(Some("fr"), Some("de-DE"));
        assert_eq!(
            lang.localize(MessageKey::InvalidSessionId, &[("session_id", "s-9")]),
            "invalid session id s-9"
        );
    }

    #[test]
    fn interpolation_replaces_placeholders() {
        let lang = Lang::default();
        assert_eq!(
            lang.localize(MessageKey::NoPerm, &[("perm", "close session")]),
            "no permission to close session"
        );
    }
}
