//! Technology fingerprinting for fetched pages.
//!
//! `detect` is a pure function of one fetched response: it matches signal
//! tables against the body, cookies and headers and returns an immutable
//! `DetectionResult` snapshot. The crawler invokes it at most once per host
//! and caches the result in the frontier.

use regex::Regex;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

/// Immutable snapshot of one fetched HTTP response, the detector's input.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Fingerprinting signals observed from the first fetched page of a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub url: Url,
    pub status_code: u16,
    pub server: String,
    pub frameworks: Vec<String>,
    pub languages: Vec<String>,
    pub headers: HashMap<String, String>,
    pub generated_by: String,
    pub x_powered_by: String,
    pub cookies: Vec<String>,
    pub technologies: Vec<String>,
}

impl DetectionResult {
    pub fn new(url: Url, status_code: u16) -> Self {
        Self {
            url,
            status_code,
            server: String::new(),
            frameworks: Vec::new(),
            languages: Vec::new(),
            headers: HashMap::new(),
            generated_by: String::new(),
            x_powered_by: String::new(),
            cookies: Vec::new(),
            technologies: Vec::new(),
        }
    }
}

struct Signal {
    needles: &'static [&'static str],
    language: Option<&'static str>,
    framework: Option<&'static str>,
    technologies: &'static [&'static str],
}

const BODY_SIGNALS: &[Signal] = &[
    Signal { needles: &["wp-content", "wp-includes"], language: Some("PHP"), framework: Some("WordPress"), technologies: &[] },
    Signal { needles: &["laravel", "laravel_session"], language: Some("PHP"), framework: Some("Laravel"), technologies: &[] },
    Signal { needles: &["ci_session", "codeigniter"], language: Some("PHP"), framework: Some("CodeIgniter"), technologies: &[] },
    Signal { needles: &["symfony", "sf_"], language: Some("PHP"), framework: Some("Symfony"), technologies: &[] },
    Signal { needles: &["csrfmiddlewaretoken", "django"], language: Some("Python"), framework: Some("Django"), technologies: &[] },
    Signal { needles: &["flask", "jinja"], language: Some("Python"), framework: Some("Flask"), technologies: &[] },
    Signal { needles: &["fastapi"], language: Some("Python"), framework: Some("FastAPI"), technologies: &[] },
    Signal { needles: &["rails", "csrf-param"], language: Some("Ruby"), framework: Some("Ruby on Rails"), technologies: &[] },
    Signal { needles: &["javax.faces", "jsf"], language: Some("Java"), framework: Some("JSF"), technologies: &[] },
    Signal { needles: &["org.springframework"], language: Some("Java"), framework: Some("Spring"), technologies: &[] },
    Signal { needles: &["next/data", "_next"], language: Some("JavaScript/TypeScript"), framework: Some("Next.js"), technologies: &["React"] },
    Signal { needles: &["gatsby"], language: Some("JavaScript/TypeScript"), framework: Some("Gatsby"), technologies: &["React"] },
    Signal { needles: &["react", "reactdom"], language: None, framework: None, technologies: &["React"] },
    Signal { needles: &["vue", "vuejs"], language: None, framework: None, technologies: &["Vue.js"] },
    Signal { needles: &["angular", "ng-"], language: None, framework: None, technologies: &["Angular"] },
];

const COOKIE_SIGNALS: &[Signal] = &[
    Signal { needles: &["laravel_session"], language: Some("PHP"), framework: Some("Laravel"), technologies: &[] },
    Signal { needles: &["ci_session"], language: Some("PHP"), framework: Some("CodeIgniter"), technologies: &[] },
    Signal { needles: &["wordpress"], language: Some("PHP"), framework: Some("WordPress"), technologies: &[] },
    Signal { needles: &["symfony"], language: Some("PHP"), framework: Some("Symfony"), technologies: &[] },
    Signal { needles: &["django"], language: Some("Python"), framework: Some("Django"), technologies: &[] },
    Signal { needles: &["flask"], language: Some("Python"), framework: Some("Flask"), technologies: &[] },
    Signal { needles: &["rails"], language: Some("Ruby"), framework: Some("Ruby on Rails"), technologies: &[] },
    Signal { needles: &["spring"], language: Some("Java"), framework: Some("Spring"), technologies: &[] },
    Signal { needles: &["next"], language: Some("JavaScript/TypeScript"), framework: Some("Next.js"), technologies: &["React"] },
    Signal { needles: &["gatsby"], language: Some("JavaScript/TypeScript"), framework: Some("Gatsby"), technologies: &["React"] },
    Signal { needles: &["react"], language: None, framework: None, technologies: &["React"] },
    Signal { needles: &["vue"], language: None, framework: None, technologies: &["Vue.js"] },
    Signal { needles: &["angular"], language: None, framework: None, technologies: &["Angular"] },
];

/// Server header substring -> technology name.
const SERVER_SIGNALS: &[(&str, &str)] = &[
    ("apache", "Apache"),
    ("nginx", "Nginx"),
    ("iis", "IIS"),
    ("cloudflare", "Cloudflare"),
];

/// `<script src>` substring -> technology name.
const SCRIPT_SIGNALS: &[(&str, &str)] = &[
    ("next", "Next.js"),
    ("react", "React"),
    ("vue", "Vue.js"),
    ("angular", "Angular"),
];

static SCRIPT_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<script[^>]*src=["']([^"']*)["']"#).expect("valid pattern"));

/// Fingerprints one fetched page. Pure: no state is shared across calls.
pub fn detect(page: &FetchedPage) -> DetectionResult {
    let mut result = DetectionResult::new(page.url.clone(), page.status);

    for (key, value) in page.headers.iter() {
        if let Ok(value) = value.to_str() {
            result
                .headers
                .entry(key.as_str().to_string())
                .or_insert_with(|| value.to_string());
            if key == &reqwest::header::SET_COOKIE {
                result.cookies.push(value.to_string());
            }
        }
    }
    result.server = header_value(&page.headers, "server");
    result.generated_by = header_value(&page.headers, "generated-by");
    result.x_powered_by = header_value(&page.headers, "x-powered-by");

    detect_from_body(&mut result, &page.body);
    detect_from_cookies(&mut result);
    detect_from_headers(&mut result);

    result
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn detect_from_body(result: &mut DetectionResult, body: &str) {
    let body_lower = body.to_lowercase();
    for signal in BODY_SIGNALS {
        if signal.needles.iter().any(|n| body_lower.contains(n)) {
            apply(result, signal);
        }
    }

    for captures in SCRIPT_SRC.captures_iter(body) {
        let src = captures[1].to_lowercase();
        for (needle, technology) in SCRIPT_SIGNALS {
            if src.contains(needle) {
                push_unique(&mut result.technologies, technology);
            }
        }
    }
}

fn detect_from_cookies(result: &mut DetectionResult) {
    let cookies: Vec<String> = result.cookies.iter().map(|c| c.to_lowercase()).collect();
    for cookie in &cookies {
        for signal in COOKIE_SIGNALS {
            if signal.needles.iter().any(|n| cookie.contains(n)) {
                apply(result, signal);
            }
        }
    }
}

fn detect_from_headers(result: &mut DetectionResult) {
    let server = result.server.to_lowercase();
    for (needle, technology) in SERVER_SIGNALS {
        if server.contains(needle) {
            push_unique(&mut result.technologies, technology);
        }
    }
}

fn apply(result: &mut DetectionResult, signal: &Signal) {
    if let Some(language) = signal.language {
        push_unique(&mut result.languages, language);
    }
    if let Some(framework) = signal.framework {
        push_unique(&mut result.frameworks, framework);
    }
    for technology in signal.technologies {
        push_unique(&mut result.technologies, technology);
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn page(body: &str, headers: HeaderMap) -> FetchedPage {
        FetchedPage {
            url: "http://example.com/".parse().unwrap(),
            status: 200,
            headers,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_detect_wordpress_from_body() {
        let result = detect(&page(
            r#"<link rel="stylesheet" href="/wp-content/themes/x/style.css">"#,
            HeaderMap::new(),
        ));
        assert_eq!(result.languages, vec!["PHP"]);
        assert_eq!(result.frameworks, vec!["WordPress"]);
    }

    #[test]
    fn test_detect_laravel_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(
            reqwest::header::SET_COOKIE,
            HeaderValue::from_static("laravel_session=abc; Path=/"),
        );
        let result = detect(&page("<html></html>", headers));
        assert!(result.frameworks.iter().any(|f| f == "Laravel"));
        assert!(result.languages.iter().any(|l| l == "PHP"));
        assert_eq!(result.cookies, vec!["laravel_session=abc; Path=/"]);
    }

    #[test]
    fn test_detect_server_technology() {
        let mut headers = HeaderMap::new();
        headers.insert("server", HeaderValue::from_static("nginx/1.25.3"));
        let result = detect(&page("<html></html>", headers));
        assert_eq!(result.server, "nginx/1.25.3");
        assert!(result.technologies.iter().any(|t| t == "Nginx"));
    }

    #[test]
    fn test_detect_script_sources() {
        let result = detect(&page(
            r#"<script src="/static/js/react.production.min.js"></script>"#,
            HeaderMap::new(),
        ));
        assert!(result.technologies.iter().any(|t| t == "React"));
    }

    #[test]
    fn test_detect_no_duplicate_entries() {
        let result = detect(&page(
            "wp-content wp-includes wordpress wp-content",
            HeaderMap::new(),
        ));
        assert_eq!(result.languages, vec!["PHP"]);
        assert_eq!(result.frameworks, vec!["WordPress"]);
    }

    #[test]
    fn test_detect_is_pure() {
        let p = page("_next/static/chunks/main.js", HeaderMap::new());
        assert_eq!(detect(&p), detect(&p));
    }
}
