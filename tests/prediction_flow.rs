mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use serde_json::json;

use leafscan::{
    ApiClient, ApiConfig, AspectRatio, CropNegotiator, CropOutcome, ImageSource,
    PredictionSession, RawImage, SessionState, Size, Step, Verdict,
};
use support::{MockServer, Reply};

fn leaf(width: u32, height: u32) -> RawImage {
    RawImage::from_pixels(
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, 140, (y % 255) as u8])),
        ImageSource::Upload,
    )
    .unwrap()
}

fn negotiate(session: &PredictionSession) -> CropOutcome {
    let original = session.original().expect("original capture kept");
    let negotiator =
        CropNegotiator::new(original, Size::new(400, 400), AspectRatio::Free).unwrap();
    negotiator.confirm().unwrap()
}

fn api(server: &MockServer) -> ApiClient {
    ApiClient::new(ApiConfig {
        base_url: server.base_url().to_string(),
        ..ApiConfig::default()
    })
    .unwrap()
}

#[test]
fn need_crop_then_detection() {
    let server = MockServer::start(|req| match req.path.as_str() {
        "/api/predict" => Reply::json(
            200,
            json!({
                "final_status": "need_crop",
                "prediction_id": "abc123",
                "cnn_result": {"best_class": "Tomato__Late_blight", "best_score": 0.42},
                "yolo_result": {"detected": false, "detections": []}
            }),
        ),
        "/api/predict-crop" => Reply::json(
            200,
            json!({
                "final_status": "yolo_detected",
                "prediction_id": "abc123",
                "disease": "Tomato__Late_blight",
                "confidence": 0.87,
                "severity": "high",
                "yolo_result": {
                    "detected": true,
                    "detections": [{"class": "Tomato__Late_blight", "confidence": 0.87, "bbox": [10, 12, 90, 80]}]
                },
                "disease_info": {"description": "Water-soaked lesions", "pesticides": "Copper fungicide"}
            }),
        ),
        _ => Reply::json(404, json!({"error": "not found"})),
    });
    let mut client = api(&server);
    let mut session = PredictionSession::default();

    let step = session.submit(&mut client, leaf(640, 480)).unwrap();
    match step {
        Step::NeedCrop {
            prediction_id,
            crop_count,
        } => {
            assert_eq!(prediction_id, "abc123");
            assert_eq!(crop_count, 1);
        }
        other => panic!("expected a crop request, got {other:?}"),
    }
    assert_eq!(session.state().name(), "need_crop");

    let outcome = negotiate(&session);
    let step = session.submit_crop(&mut client, &outcome).unwrap();
    let Step::Done(Verdict::Detected(response)) = step else {
        panic!("expected a detection");
    };
    assert_eq!(response.disease.as_deref(), Some("Tomato__Late_blight"));
    assert_eq!(response.confidence, Some(0.87));
    let info = response.disease_info.as_ref().unwrap();
    assert_eq!(info.pesticides, vec!["Copper fungicide".to_string()]);
    assert!(matches!(session.state(), SessionState::Result(_)));

    let crop = server.last("/api/predict-crop").json();
    assert_eq!(crop["prediction_id"], "abc123");
    assert_eq!(crop["crop_count"], 1);
    let coords = &crop["crop_coordinates"];
    let (x, w) = (coords["x"].as_u64().unwrap(), coords["width"].as_u64().unwrap());
    let (y, h) = (coords["y"].as_u64().unwrap(), coords["height"].as_u64().unwrap());
    assert!(w > 0 && h > 0);
    assert!(x + w <= 640 && y + h <= 480);
    assert!(!crop["cropped_image"].as_str().unwrap().starts_with("data:"));
}

#[test]
fn crop_rounds_stop_at_the_limit() {
    let rounds = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&rounds);
    let server = MockServer::start(move |req| {
        if req.path == "/api/predict-crop" {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Reply::json(
            200,
            json!({"final_status": "need_crop", "prediction_id": "p-9"}),
        )
    });
    let mut client = api(&server);
    let mut session = PredictionSession::new(2);

    let mut step = session.submit(&mut client, leaf(300, 300)).unwrap();
    let mut counts = Vec::new();
    while let Step::NeedCrop { crop_count, .. } = step {
        counts.push(crop_count);
        let outcome = negotiate(&session);
        step = session.submit_crop(&mut client, &outcome).unwrap();
    }
    assert_eq!(counts, vec![1, 2]);
    assert_eq!(rounds.load(Ordering::SeqCst), 2);
    assert!(matches!(step, Step::Done(Verdict::CropLimitReached(_))));

    let sent: Vec<u64> = server
        .requests()
        .iter()
        .filter(|req| req.path == "/api/predict-crop")
        .map(|req| req.json()["crop_count"].as_u64().unwrap())
        .collect();
    assert_eq!(sent, vec![1, 2]);
}

#[test]
fn server_failure_leaves_the_session_ready_to_retry() {
    let server = MockServer::start(|_| Reply::json(500, json!({"error": "busy, try again"})));
    let mut client = api(&server);
    let mut session = PredictionSession::default();

    let err = session.submit(&mut client, leaf(64, 64)).unwrap_err();
    assert_eq!(err.user_message(), "busy, try again");
    assert!(matches!(session.state(), SessionState::Idle));
    assert!(!session.is_processing());
}

#[test]
fn not_plant_is_reported_as_a_result() {
    let server = MockServer::start(|_| {
        Reply::json(
            200,
            json!({"final_status": "not_plant", "message": "No plant detected"}),
        )
    });
    let mut client = api(&server);
    let mut session = PredictionSession::default();

    let step = session.submit(&mut client, leaf(64, 64)).unwrap();
    let Step::Done(verdict) = step else {
        panic!("expected a terminal result");
    };
    assert!(matches!(verdict, Verdict::NotPlant(_)));
    assert_eq!(verdict.response().message.as_deref(), Some("No plant detected"));
}

#[test]
fn failed_crop_round_can_be_retried_on_the_same_prediction() {
    let crop_calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&crop_calls);
    let server = MockServer::start(move |req| match req.path.as_str() {
        "/api/predict" => Reply::json(
            200,
            json!({"final_status": "need_crop", "prediction_id": "abc123"}),
        ),
        "/api/predict-crop" if counter.fetch_add(1, Ordering::SeqCst) == 0 => {
            Reply::json(500, json!({"error": "detector restarting"}))
        }
        "/api/predict-crop" => Reply::json(
            200,
            json!({
                "final_status": "yolo_detected",
                "prediction_id": "abc123",
                "disease": "Tomato__Late_blight",
                "confidence": 0.87
            }),
        ),
        _ => Reply::json(404, json!({"error": "not found"})),
    });
    let mut client = api(&server);
    let mut session = PredictionSession::default();
    session.submit(&mut client, leaf(320, 240)).unwrap();

    let outcome = negotiate(&session);
    let err = session.submit_crop(&mut client, &outcome).unwrap_err();
    assert_eq!(err.user_message(), "detector restarting");
    assert_eq!(session.state().name(), "need_crop");
    assert_eq!(session.prediction_id(), Some("abc123"));
    assert_eq!(session.crop_count(), 1);

    let outcome = negotiate(&session);
    let step = session.submit_crop(&mut client, &outcome).unwrap();
    assert!(matches!(step, Step::Done(Verdict::Detected(_))));

    let sent: Vec<(String, u64)> = server
        .requests()
        .iter()
        .filter(|req| req.path == "/api/predict-crop")
        .map(|req| {
            let body = req.json();
            (
                body["prediction_id"].as_str().unwrap().to_string(),
                body["crop_count"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        sent,
        vec![("abc123".to_string(), 1), ("abc123".to_string(), 1)]
    );
}
