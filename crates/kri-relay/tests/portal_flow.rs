//! End-to-end tests of the login flow and data calls against a mock portal.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use kri_relay::{
    ColumnOverrides, Credentials, PortalEndpoints, PortalSession, Relay, RelayError,
    ReqwestTransport, SessionState, StepRole, DEFAULT_SESSION_TTL,
};

// ─────────────────────── helpers ───────────────────────

fn relay_for(server: &MockServer, timeout: Duration) -> Relay {
    let transport = ReqwestTransport::new(timeout).unwrap();
    let endpoints = PortalEndpoints::with_origin(&server.uri()).unwrap();
    Relay::new(PortalSession::new(
        Arc::new(transport),
        Credentials::from_plain("researcher", "secret"),
        endpoints,
        DEFAULT_SESSION_TTL,
    ))
}

/// Matches requests whose Cookie header carries `name=`.
fn has_cookie(name: &'static str) -> impl Fn(&Request) -> bool + Send + Sync + 'static {
    move |req: &Request| {
        req.headers
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains(&format!("{name}=")))
    }
}

/// Mount a portal whose login succeeds; `bootstrap_hits` is the expected
/// number of entry page loads.
async fn mount_login(server: &MockServer, bootstrap_hits: u64) {
    Mock::given(method("GET"))
        .and(path("/kri2"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/kri2/main")
                .insert_header("set-cookie", "WMONID=w1; Path=/"),
        )
        .expect(bootstrap_hits)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/kri2/main"))
        .and(has_cookie("WMONID"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "JSESSIONID=j1; Path=/; HttpOnly"),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/kri/rp/crosscert/GetCertSign.jsp"))
        .and(query_param("txtAnotherLogin", "N"))
        .and(body_string_contains("id=cmVzZWFyY2hlcg%3D%3D"))
        .and(body_string_contains("sysid=KRI"))
        .and(has_cookie("JSESSIONID"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>cert ok</html>"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/kri/rp/login_exec.jsp"))
        .and(query_param("txtLoginId", "cmVzZWFyY2hlcg=="))
        .and(query_param("txtUserPw", "c2VjcmV0"))
        .and(has_cookie("JSESSIONID"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<script>location.href='/kri2';</script>"))
        .mount(server)
        .await;

    Mock::given(path("/kri/rp/rschachv/PG-RP-101-01jl.jsp"))
        .and(has_cookie("potalHelpViewYn"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>achievements</html>"))
        .mount(server)
        .await;
}

async fn mount_sheets(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/kri/rp/rschachv/PG-RP-108-01js.jsp"))
        .and(body_string_contains("txtRschrRegNo=12570694"))
        .and(body_string_contains("sheetAcation=F"))
        .and(has_cookie("JSESSIONID"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html;charset=UTF-8")
                .set_body_string(
                    "<SHEET><DATA>\
                     <TR><![CDATA[1‡12570694‡M-001‡202301‡Deep Sheets]]></TR>\
                     <TR><![CDATA[2‡‡‡‡]]></TR>\
                     <TR><![CDATA[3‡12570694‡M-002‡202211‡Cookie Jars]]></TR>\
                     </DATA></SHEET>",
                ),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/kri/rp/rschachv/PG-RP-110-01js.jsp"))
        .and(has_cookie("JSESSIONID"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<SHEET><DATA><TR><![CDATA[1‡12570694‡R-9‡202001]]></TR></DATA></SHEET>",
        ))
        .mount(server)
        .await;
}

// ─────────────────────── tests ───────────────────────

#[tokio::test]
async fn test_full_login_and_fetch() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    mount_sheets(&server).await;
    let relay = relay_for(&server, Duration::from_secs(5));

    let out = relay
        .fetch_achievements("12570694", &ColumnOverrides::default())
        .await
        .unwrap();

    assert_eq!(relay.session().state(), SessionState::Authenticated);
    assert_eq!(out.papers.status, 200);
    assert_eq!(out.papers.records.len(), 2);
    assert_eq!(out.papers.records[0].get("MNG_NO"), Some("M-001"));
    assert_eq!(out.papers.records[0].get("PBLC_YM"), Some("202301"));
    assert_eq!(out.papers.records[0].get("LANG_PPR_NM"), Some("Deep Sheets"));
    assert_eq!(out.papers.records[1].get("MNG_NO"), Some("M-002"));
    assert_eq!(out.projects.records[0].get("MNG_NO"), Some("R-9"));
    assert_eq!(out.projects.records[0].get("RSCH_CMCM_YM"), Some("202001"));
}

#[tokio::test]
async fn test_concurrent_requests_log_in_once() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    mount_sheets(&server).await;
    let relay = Arc::new(relay_for(&server, Duration::from_secs(5)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay
                    .fetch_achievements("12570694", &ColumnOverrides::default())
                    .await
            })
        })
        .collect();

    for handle in handles {
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out.papers.records.len(), 2);
    }
    assert_eq!(relay.session().login_attempts(), 1);
}

#[tokio::test]
async fn test_login_failure_marker_surfaces() {
    let server = MockServer::start().await;
    Mock::given(path("/kri2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(path("/kri/rp/crosscert/GetCertSign.jsp"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(path("/kri/rp/login_exec.jsp"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<script>alert('로그인에 실패하였습니다.');</script>"),
        )
        .mount(&server)
        .await;
    Mock::given(path("/kri/rp/rschachv/PG-RP-101-01jl.jsp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let relay = relay_for(&server, Duration::from_secs(5));

    let err = relay
        .fetch_achievements("12570694", &ColumnOverrides::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RelayError::LoginFailed {
            step: StepRole::Exec,
            ..
        }
    ));
    assert_eq!(relay.session().state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn test_slow_portal_times_out() {
    let server = MockServer::start().await;
    Mock::given(path("/kri2"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let relay = relay_for(&server, Duration::from_millis(100));

    let err = relay.session().ensure_session().await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert_eq!(err.step(), Some(StepRole::Bootstrap));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_redirect_loop_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(path("/kri2"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/kri2"))
        .mount(&server)
        .await;
    let relay = relay_for(&server, Duration::from_secs(5));

    let err = relay.session().ensure_session().await.unwrap_err();
    assert_eq!(err.kind(), "redirect_loop");
    assert_eq!(err.step(), Some(StepRole::Bootstrap));
}
