use std::borrow::Cow;
use std::fmt;

/// HTTP 请求方法的令牌封装。
///
/// # 设计背景（Why）
/// - 方法关联队列按方法值判定响应体语义（HEAD、CONNECT），
///   需要一个可比较、可克隆、常量可用的轻量类型；
/// - 标准方法以 `'static` 借用表示零分配，扩展方法按值持有。
///
/// # 契约说明（What）
/// - 方法名大小写敏感（RFC 9110 §9.1），`from_token` 不做归一化。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HttpMethod(Cow<'static, str>);

impl HttpMethod {
    pub const GET: HttpMethod = HttpMethod(Cow::Borrowed("GET"));
    pub const HEAD: HttpMethod = HttpMethod(Cow::Borrowed("HEAD"));
    pub const POST: HttpMethod = HttpMethod(Cow::Borrowed("POST"));
    pub const PUT: HttpMethod = HttpMethod(Cow::Borrowed("PUT"));
    pub const DELETE: HttpMethod = HttpMethod(Cow::Borrowed("DELETE"));
    pub const OPTIONS: HttpMethod = HttpMethod(Cow::Borrowed("OPTIONS"));
    pub const TRACE: HttpMethod = HttpMethod(Cow::Borrowed("TRACE"));
    pub const CONNECT: HttpMethod = HttpMethod(Cow::Borrowed("CONNECT"));
    pub const PATCH: HttpMethod = HttpMethod(Cow::Borrowed("PATCH"));

    /// 从报文令牌构造方法；已知方法复用常量，未知方法按值保留。
    pub fn from_token(token: &str) -> HttpMethod {
        match token {
            "GET" => Self::GET,
            "HEAD" => Self::HEAD,
            "POST" => Self::POST,
            "PUT" => Self::PUT,
            "DELETE" => Self::DELETE,
            "OPTIONS" => Self::OPTIONS,
            "TRACE" => Self::TRACE,
            "CONNECT" => Self::CONNECT,
            "PATCH" => Self::PATCH,
            other => HttpMethod(Cow::Owned(other.to_owned())),
        }
    }

    /// 方法名。
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tokens_reuse_constants() {
        assert_eq!(HttpMethod::from_token("CONNECT"), HttpMethod::CONNECT);
        assert_eq!(HttpMethod::from_token("HEAD").name(), "HEAD");
    }

    #[test]
    fn unknown_tokens_are_preserved_verbatim() {
        let method = HttpMethod::from_token("PURGE");
        assert_eq!(method.name(), "PURGE");
        assert_ne!(method, HttpMethod::GET);
    }
}
