//! Exercises the HTTP adapters against a canned local server.

use std::collections::BTreeMap;

use dispatch_core::{
    LatLng, OptimizerClient, OptimizerError, RouteError, RouteProvider, SolveVrpRequest,
};
use dispatch_data::{HttpOptimizerClient, OsrmRouteProvider, OsrmRouteProviderConfig};
use futures_util::StreamExt;
use rstest::rstest;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct Canned {
    status: &'static str,
    content_type: &'static str,
    body: String,
}

/// Serve one canned response and hand back the request line and body.
async fn serve_once(canned: Canned) -> (String, JoinHandle<(String, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local address");
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .await
            .expect("read request line");
        let mut content_length = 0_usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).await.expect("read header");
            let trimmed = header.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((name, value)) = trimmed.split_once(':')
                && name.eq_ignore_ascii_case("content-length")
            {
                content_length = value.trim().parse().expect("numeric length");
            }
        }
        let mut body = vec![0_u8; content_length];
        reader.read_exact(&mut body).await.expect("read body");

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            canned.status,
            canned.content_type,
            canned.body.len(),
            canned.body
        );
        let mut stream = reader.into_inner();
        stream
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        stream.shutdown().await.expect("close");
        (
            request_line.trim().to_owned(),
            String::from_utf8(body).expect("utf-8 body"),
        )
    });
    (format!("http://{address}"), handle)
}

fn solution_line(unassigned: i64) -> String {
    format!(
        concat!(
            r#"{{"solution":{{"score":{{"is_valid":true,"hard_score":0,"#,
            r#""unassigned_visits_score":{},"soft_score":0}},"description":{{}}}},"#,
            r#""optimizer_version":"v7"}}"#
        ),
        unassigned
    )
}

#[rstest]
#[tokio::test]
async fn optimizer_streams_every_solution_line() {
    let (base_url, server) = serve_once(Canned {
        status: "200 OK",
        content_type: "application/x-ndjson",
        body: format!("{}\n\n{}\n", solution_line(3), solution_line(1)),
    })
    .await;
    let client = HttpOptimizerClient::new(base_url).expect("client builds");

    let stream = client
        .solve_vrp(SolveVrpRequest::default())
        .await
        .expect("stream opens");
    let solutions: Vec<_> = stream.collect().await;

    let scores: Vec<i64> = solutions
        .iter()
        .map(|item| {
            item.as_ref()
                .map(|response| response.solution.score.unassigned_visits_score)
                .expect("solution decodes")
        })
        .collect();
    assert_eq!(scores, vec![3, 1]);
    let (request_line, body) = server.await.expect("server finishes");
    assert_eq!(request_line, "POST /v1/solve-vrp HTTP/1.1");
    let sent: SolveVrpRequest = serde_json::from_str(&body).expect("request is JSON");
    assert_eq!(sent, SolveVrpRequest::default());
}

#[rstest]
#[case("400 Bad Request", true)]
#[case("503 Service Unavailable", false)]
#[tokio::test]
async fn optimizer_rejections_map_to_errors(#[case] status: &'static str, #[case] invalid: bool) {
    let (base_url, server) = serve_once(Canned {
        status,
        content_type: "text/plain",
        body: "nope".to_owned(),
    })
    .await;
    let client = HttpOptimizerClient::new(base_url).expect("client builds");

    let err = match client.solve_vrp(SolveVrpRequest::default()).await {
        Ok(_) => panic!("{status} should fail"),
        Err(err) => err,
    };
    if invalid {
        assert!(matches!(err, OptimizerError::InvalidRequest { .. }), "{err:?}");
    } else {
        assert!(matches!(err, OptimizerError::Unavailable { .. }), "{err:?}");
    }
    server.await.expect("server finishes");
}

#[rstest]
#[tokio::test]
async fn osrm_routes_decode_to_microdegrees() {
    let (base_url, server) = serve_once(Canned {
        status: "200 OK",
        content_type: "application/json",
        body: r#"{"code":"Ok","routes":[{"geometry":{"coordinates":
            [[-104.990251,39.739236],[-104.98,39.75]]}}]}"#
            .to_owned(),
    })
    .await;
    let provider = OsrmRouteProvider::with_config(
        OsrmRouteProviderConfig::new(base_url).with_profile("car"),
    )
    .expect("provider builds");
    let points = [
        LatLng {
            lat_e6: 39_739_236,
            lng_e6: -104_990_251,
        },
        LatLng {
            lat_e6: 39_750_000,
            lng_e6: -104_980_000,
        },
    ];

    let polyline = provider
        .route_polyline(&points, &BTreeMap::new())
        .await
        .expect("route resolves");

    assert_eq!(polyline, points.to_vec());
    let (request_line, _) = server.await.expect("server finishes");
    assert!(
        request_line.starts_with(
            "GET /route/v1/car/-104.990251,39.739236;-104.980000,39.750000?overview=full"
        ),
        "{request_line}"
    );
}

#[rstest]
#[case("200 OK", r#"{"code":"NoRoute","message":"Impossible route"}"#)]
#[case("502 Bad Gateway", "upstream down")]
#[tokio::test]
async fn osrm_failures_are_reported(#[case] status: &'static str, #[case] body: &str) {
    let (base_url, server) = serve_once(Canned {
        status,
        content_type: "application/json",
        body: body.to_owned(),
    })
    .await;
    let provider = OsrmRouteProvider::new(base_url).expect("provider builds");
    let points = [
        LatLng {
            lat_e6: 1_000_000,
            lng_e6: 2_000_000,
        },
        LatLng {
            lat_e6: 1_500_000,
            lng_e6: 2_500_000,
        },
    ];

    let err = provider
        .route_polyline(&points, &BTreeMap::new())
        .await
        .expect_err("route fails");

    match err {
        RouteError::Service { code, message } => {
            assert_eq!(code, "NoRoute");
            assert_eq!(message, "Impossible route");
        }
        RouteError::Http { status, .. } => assert_eq!(status, 502),
        other => panic!("unexpected error {other:?}"),
    }
    server.await.expect("server finishes");
}
