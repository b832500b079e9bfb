use serde_json::{Value, json};
use toolbridge_mcp_runtime::util::to_pretty_json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", to_pretty_json(&err));
    std::process::exit(4);
}

pub fn print_json(value: &Value, raw: bool) {
    if raw {
        println!("{value}");
    } else {
        println!("{}", to_pretty_json(value));
    }
}

/// Call the toolbridge API, print the response, and map the outcome to an
/// exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    token: Option<&str>,
    raw: bool,
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{}{path}", api_url.trim_end_matches('/'))) {
        Ok(u) => u,
        Err(e) => {
            let err = json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {api_url}{path}: {e}")
            });
            eprintln!("{}", to_pretty_json(&err));
            return 4;
        }
    };

    let mut req = client().request(method, url);
    if let Some(t) = token {
        req = req.bearer_auth(t);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the toolbridge API running? Check TOOLBRIDGE_API_URL."
            });
            eprintln!("{}", to_pretty_json(&err));
            return 3;
        }
    };

    let exit_code = status_exit_code(resp.status().as_u16());
    let body: Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    if exit_code == 0 {
        print_json(&body, raw);
    } else {
        eprintln!("{}", to_pretty_json(&body));
    }
    exit_code
}

pub fn status_exit_code(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn exit_codes_follow_status_class() {
        assert_eq!(status_exit_code(204), 0);
        assert_eq!(status_exit_code(401), 1);
        assert_eq!(status_exit_code(502), 2);
    }

    #[tokio::test]
    async fn api_request_sends_bearer_and_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "unauthorized"})))
            .expect(1)
            .mount(&server)
            .await;

        let code = api_request(
            &format!("{}/", server.uri()),
            reqwest::Method::GET,
            "/catalog",
            Some("tok"),
            true,
        )
        .await;
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn unreachable_api_is_a_connection_error() {
        let code = api_request("http://127.0.0.1:9", reqwest::Method::GET, "/health", None, true).await;
        assert_eq!(code, 3);
    }
}
