use reqwest::Url;

use crate::error::CoreError;

/// Validate an explorer base URL and normalize it to have no trailing
/// slash, so endpoint paths can be appended with a single `/`.
pub(super) fn parse_connection(connection: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(connection).map_err(|e| {
        CoreError::InvalidConfig(format!(
            "invalid API URL `{connection}`: expected HTTP(S) URL ({e})"
        ))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(connection.trim_end_matches('/').to_owned()),
        other => Err(CoreError::InvalidConfig(format!(
            "unsupported API URL scheme `{other}`; expected http or https"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_connection_https_url() {
        let parsed = parse_connection("https://blockchain.info").expect("should parse");
        assert_eq!(parsed, "https://blockchain.info");
    }

    #[test]
    fn parse_connection_strips_trailing_slash() {
        let parsed = parse_connection("http://127.0.0.1:8080/api/").expect("should parse");
        assert_eq!(parsed, "http://127.0.0.1:8080/api");
    }

    #[test]
    fn parse_connection_invalid_scheme() {
        let err = parse_connection("ftp://example.com").expect_err("must reject ftp");
        assert!(err.to_string().contains("unsupported API URL scheme"));
    }

    #[test]
    fn parse_connection_garbage() {
        let err = parse_connection("not a url").expect_err("must reject garbage");
        assert!(err.to_string().contains("invalid API URL"));
    }
}
