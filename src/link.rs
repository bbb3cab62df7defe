//! Connection links
//!
//! `mw://PASSWORD@HOST:PORT#NAME`: the password is percent-encoded, the
//! name fragment is percent-decoded on parse.

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use thiserror::Error;
use url::Url;

/// A parsed connection link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLink {
    pub name: String,
    pub server: String,
    pub password: String,
}

/// Link errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid link: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("invalid scheme, must be mw://")]
    Scheme,

    #[error("missing host")]
    MissingHost,

    #[error("invalid percent-encoding")]
    Encoding,
}

/// Parse an `mw://` connection link.
pub fn parse_link(link: &str) -> Result<ConnectionLink, LinkError> {
    let url = Url::parse(link)?;
    if url.scheme() != "mw" {
        return Err(LinkError::Scheme);
    }
    let host = url.host_str().ok_or(LinkError::MissingHost)?;
    let server = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let password = percent_decode_str(url.username())
        .decode_utf8()
        .map_err(|_| LinkError::Encoding)?
        .into_owned();
    let name = percent_decode_str(url.fragment().unwrap_or(""))
        .decode_utf8()
        .map_err(|_| LinkError::Encoding)?
        .into_owned();
    Ok(ConnectionLink {
        name,
        server,
        password,
    })
}

/// Build an `mw://` link from its parts.
pub fn build_link(name: &str, server: &str, password: &str) -> String {
    format!(
        "mw://{}@{}#{}",
        utf8_percent_encode(password, NON_ALPHANUMERIC),
        server,
        utf8_percent_encode(name, NON_ALPHANUMERIC)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let link = parse_link("mw://hunter2@play.example.net:25565#My%20Server").unwrap();
        assert_eq!(link.name, "My Server");
        assert_eq!(link.server, "play.example.net:25565");
        assert_eq!(link.password, "hunter2");
    }

    #[test]
    fn test_parse_encoded_password() {
        let link = parse_link("mw://p%40ss%2Fword@host:1#n").unwrap();
        assert_eq!(link.password, "p@ss/word");
    }

    #[test]
    fn test_parse_empty_fragment() {
        let link = parse_link("mw://pw@host:1").unwrap();
        assert_eq!(link.name, "");
    }

    #[test]
    fn test_wrong_scheme_rejected() {
        assert!(matches!(
            parse_link("http://pw@host:1#n"),
            Err(LinkError::Scheme)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_link("not a link").is_err());
    }

    #[test]
    fn test_roundtrip() {
        for (name, server, password) in [
            ("My Server", "play.example.net:25565", "hunter2"),
            ("name#with@odd:chars", "host:1", "p@ss wörd/!"),
            ("", "h:2", ""),
        ] {
            let parsed = parse_link(&build_link(name, server, password)).unwrap();
            assert_eq!(parsed.name, name);
            assert_eq!(parsed.server, server);
            assert_eq!(parsed.password, password);
        }
    }
}
