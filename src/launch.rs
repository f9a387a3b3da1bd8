use std::path::PathBuf;

use crate::config::ViewerConfig;
use crate::roi::{PropagationPolicy, SyncMode};

const URI_SCHEME: &str = "slicecompare://";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub service_url: Option<String>,
    pub config_path: Option<PathBuf>,
    pub mode: Option<SyncMode>,
    pub propagation: Option<PropagationPolicy>,
}

impl LaunchOptions {
    pub fn apply_to(&self, config: &mut ViewerConfig) {
        if let Some(url) = &self.service_url {
            config.service.base_url = url.clone();
        }
        if let Some(mode) = self.mode {
            config.roi.mode = mode;
        }
        if let Some(propagation) = self.propagation {
            config.roi.propagation = propagation;
        }
    }
}

pub fn parse_launch_options_from_args(args: &[String]) -> Result<LaunchOptions, String> {
    if args.len() == 1 && is_slicecompare_uri(&args[0]) {
        return parse_slicecompare_uri(&args[0]);
    }

    let mut options = LaunchOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = || {
            inline_value
                .clone()
                .or_else(|| iter.next().cloned())
                .ok_or_else(|| format!("Missing value after {flag}."))
        };
        match flag {
            "--service" => options.service_url = Some(parse_service_url(&value()?)?),
            "--config" => options.config_path = Some(parse_config_path(&value()?)?),
            "--mode" => options.mode = Some(parse_mode(&value()?)?),
            "--propagation" => options.propagation = Some(parse_propagation(&value()?)?),
            other => return Err(format!("Unknown argument: {other}")),
        }
    }
    Ok(options)
}

pub fn parse_slicecompare_uri(uri: &str) -> Result<LaunchOptions, String> {
    let rest = strip_slicecompare_scheme(uri)
        .ok_or_else(|| format!("URL must start with {URI_SCHEME}"))?;

    let (location, query) = split_location_and_query(rest);
    let location = location.trim_matches('/');
    if !location.is_empty() && !location.eq_ignore_ascii_case("open") {
        return Err(format!("Unsupported launch action: {location}"));
    }

    let mut options = LaunchOptions::default();
    let Some(query_string) = query else {
        return Ok(options);
    };
    for pair in query_string.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = key.trim().to_ascii_lowercase();
        let decoded_value = percent_decode(value)?;
        match key.as_str() {
            "service" | "service_url" | "url" => {
                options.service_url = Some(parse_service_url(&decoded_value)?);
            }
            "config" => options.config_path = Some(parse_config_path(&decoded_value)?),
            "mode" => options.mode = Some(parse_mode(&decoded_value)?),
            "propagation" => options.propagation = Some(parse_propagation(&decoded_value)?),
            _ => log::debug!("Ignoring unknown launch parameter {key}"),
        }
    }
    Ok(options)
}

fn parse_service_url(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err("Service URL must start with http:// or https://.".to_string());
    }
    Ok(trimmed.to_string())
}

fn parse_config_path(value: &str) -> Result<PathBuf, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("Config path must not be empty.".to_string());
    }
    Ok(PathBuf::from(trimmed))
}

fn parse_mode(value: &str) -> Result<SyncMode, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "synchronized" | "sync" => Ok(SyncMode::Synchronized),
        "independent" => Ok(SyncMode::Independent),
        other => Err(format!(
            "mode must be synchronized or independent, got {other:?}."
        )),
    }
}

fn parse_propagation(value: &str) -> Result<PropagationPolicy, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "unchecked" => Ok(PropagationPolicy::Unchecked),
        "checked" => Ok(PropagationPolicy::Checked),
        other => Err(format!(
            "propagation must be checked or unchecked, got {other:?}."
        )),
    }
}

fn is_slicecompare_uri(value: &str) -> bool {
    strip_slicecompare_scheme(value).is_some()
}

fn strip_slicecompare_scheme(uri: &str) -> Option<&str> {
    if uri.len() >= URI_SCHEME.len() && uri[..URI_SCHEME.len()].eq_ignore_ascii_case(URI_SCHEME) {
        Some(&uri[URI_SCHEME.len()..])
    } else {
        None
    }
}

fn split_location_and_query(value: &str) -> (&str, Option<&str>) {
    let value = value.split('#').next().unwrap_or_default();
    match value.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (value, None),
    }
}

fn percent_decode(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => {
                decoded.push(b' ');
                index += 1;
            }
            b'%' => {
                let escaped = bytes
                    .get(index + 1..index + 3)
                    .and_then(|pair| Some((decode_hex_digit(pair[0])?, decode_hex_digit(pair[1])?)))
                    .ok_or_else(|| "Invalid percent-encoding in URL.".to_string())?;
                decoded.push((escaped.0 << 4) | escaped.1);
                index += 3;
            }
            byte => {
                decoded.push(byte);
                index += 1;
            }
        }
    }

    String::from_utf8(decoded).map_err(|_| "URL contains invalid UTF-8 after decoding.".to_string())
}

fn decode_hex_digit(value: u8) -> Option<u8> {
    match value {
        b'0'..=b'9' => Some(value - b'0'),
        b'a'..=b'f' => Some(value - b'a' + 10),
        b'A'..=b'F' => Some(value - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn no_args_means_no_overrides() {
        assert_eq!(
            parse_launch_options_from_args(&[]),
            Ok(LaunchOptions::default())
        );
    }

    #[test]
    fn parse_flags_with_separate_and_inline_values() {
        let options = parse_launch_options_from_args(&args(&[
            "--service",
            "http://10.0.0.5:9000",
            "--mode=independent",
            "--propagation",
            "checked",
            "--config",
            "/tmp/viewer.toml",
        ]))
        .expect("args should parse");
        assert_eq!(
            options,
            LaunchOptions {
                service_url: Some("http://10.0.0.5:9000".to_string()),
                config_path: Some(PathBuf::from("/tmp/viewer.toml")),
                mode: Some(SyncMode::Independent),
                propagation: Some(PropagationPolicy::Checked),
            }
        );
    }

    #[test]
    fn flag_without_value_is_an_error() {
        let err = parse_launch_options_from_args(&args(&["--mode"])).expect_err("needs a value");
        assert!(err.contains("--mode"));
        assert!(parse_launch_options_from_args(&args(&["--bogus", "1"])).is_err());
    }

    #[test]
    fn parse_uri_with_encoded_values() {
        let options = parse_slicecompare_uri(
            "slicecompare://open?service=http%3A%2F%2Fhost%3A8765&config=%2Fhome%2Fme%2Fmy+settings.toml&mode=Independent",
        )
        .expect("URI should parse");
        assert_eq!(options.service_url.as_deref(), Some("http://host:8765"));
        assert_eq!(
            options.config_path,
            Some(PathBuf::from("/home/me/my settings.toml"))
        );
        assert_eq!(options.mode, Some(SyncMode::Independent));
        assert_eq!(options.propagation, None);
    }

    #[test]
    fn single_uri_argument_is_routed_to_uri_parser() {
        let options = parse_launch_options_from_args(&args(&[
            "SLICECOMPARE://open?propagation=checked",
        ]))
        .expect("URI should parse");
        assert_eq!(options.propagation, Some(PropagationPolicy::Checked));
    }

    #[test]
    fn invalid_uri_values_are_rejected() {
        assert!(parse_slicecompare_uri("slicecompare://open?mode=sideways").is_err());
        assert!(parse_slicecompare_uri("slicecompare://open?service=ftp%3A%2F%2Fx").is_err());
        assert!(parse_slicecompare_uri("slicecompare://open?config=%zz").is_err());
        assert!(parse_slicecompare_uri("slicecompare://close").is_err());
        assert!(parse_slicecompare_uri("perspective://open").is_err());
    }

    #[test]
    fn percent_decode_handles_trailing_escape() {
        assert_eq!(percent_decode("a%41"), Ok("aA".to_string()));
        assert!(percent_decode("a%4").is_err());
    }

    #[test]
    fn launch_values_override_config() {
        let mut config = ViewerConfig::default();
        LaunchOptions {
            service_url: Some("http://other:1".to_string()),
            mode: Some(SyncMode::Independent),
            ..LaunchOptions::default()
        }
        .apply_to(&mut config);
        assert_eq!(config.service.base_url, "http://other:1");
        assert_eq!(config.roi.mode, SyncMode::Independent);
        assert_eq!(config.roi.propagation, PropagationPolicy::Unchecked);
    }
}
