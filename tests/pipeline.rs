use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use scene_chain_shorts::api::veo::VeoClient;
use scene_chain_shorts::blueprint::Blueprint;
use scene_chain_shorts::captions::{CaptionOverlayEngine, StylePreset};
use scene_chain_shorts::chain::{Clip, ContinuityFrame, FrameExtractor};
use scene_chain_shorts::compositor::{CompositionStrategy, TransitionCompositor};
use scene_chain_shorts::config::{CaptionSettings, Config, DEFAULT_FONT_FILE};
use scene_chain_shorts::poller::Sleeper;
use scene_chain_shorts::run::RunAssembler;
use scene_chain_shorts::storage::GsutilStore;
use scene_chain_shorts::timeline::Timeline;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BLUEPRINT: &str = r#"{
    "id": "Dead Screen Hustle",
    "video_spec": {"duration_sec": 16, "aspect_ratio": "9:16"},
    "script": [
        {"t_start": 0.5, "t_end": 6, "speaker": "host", "line": "This screen was dead.", "broll_cue": "Dark TV"},
        {"t_start": 9, "t_end": 14, "speaker": "host", "line": "Now it pays rent.", "broll_cue": "Lit TV"}
    ],
    "scene_breakdown": [
        {"scene_number": 1, "duration_sec": 8, "scene_type": "initial", "prompt_text": "A dim restaurant"},
        {"scene_number": 2, "duration_sec": 8, "scene_type": "continuation", "prompt_text": "Same restaurant, screen on"}
    ],
    "caption_overlay": [
        {"t_start": 4, "t_end": 4, "text": "zero length"}
    ]
}"#;

struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

struct StubFrames;

#[async_trait]
impl FrameExtractor for StubFrames {
    async fn extract_last_frame(&self, _clip: &Path, dest: &Path) -> Result<ContinuityFrame> {
        fs::create_dir_all(dest.parent().unwrap()).await?;
        fs::write(dest, b"jpeg").await?;
        Ok(ContinuityFrame {
            path: dest.to_path_buf(),
            base64_data: STANDARD.encode(b"jpeg"),
            mime_type: "image/jpeg".into(),
        })
    }
}

struct CopyFirst;

#[async_trait]
impl CompositionStrategy for CopyFirst {
    fn name(&self) -> &'static str {
        "copy-first"
    }

    fn accepts(&self, clip_count: usize) -> bool {
        clip_count >= 1
    }

    async fn compose(&self, clips: &[Clip], output: &Path, _work_dir: &Path) -> Result<Timeline> {
        fs::copy(&clips[0].path, output).await?;
        let durations: Vec<f64> = clips.iter().map(|c| c.duration).collect();
        Timeline::crossfaded(&durations, 0.5)
    }
}

#[tokio::test]
async fn blueprint_runs_end_to_end_against_mock_veo() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("generated.mp4");
    fs::write(&source, b"veo-output").await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r":predictLongRunning$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "projects/p/operations/op-1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r":fetchPredictOperation$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "done": true,
            "response": {"videos": [{"gcsUri": format!("file://{}", source.display())}]}
        })))
        .mount(&server)
        .await;

    let mut cfg = Config::from_json(r#"{"project_id": "p"}"#).unwrap();
    cfg.api_base_url = Some(server.uri());
    cfg.output_root = dir.path().join("out");

    let backend = VeoClient::with_client(reqwest::Client::new(), &cfg, "test-token".into());
    let assembler = RunAssembler::new(&cfg, &backend, &GsutilStore, &StubFrames, &NoSleep)
        .with_compositor(TransitionCompositor::new(vec![Box::new(CopyFirst)]));

    let bp_path = dir.path().join("blueprint.json");
    fs::write(&bp_path, BLUEPRINT).await.unwrap();
    let report = assembler.run_file(&bp_path).await.unwrap();

    assert_eq!(fs::read(&report.final_video).await.unwrap(), b"veo-output");
    assert!(report.metadata.run_id.ends_with("_dead-screen-hustle"));
    assert_eq!(report.metadata.duration_sec, 15.5);
    assert_eq!(report.metadata.captions_applied, 0);
    assert_eq!(report.metadata.captions_skipped, 1);
    assert_eq!(
        report.metadata.scenes[0].continuity_frame.as_deref(),
        Some("frames/scene_01_last_frame.jpg")
    );
    assert_eq!(fs::read_to_string(report.run_dir.join("blueprint.json")).await.unwrap(), BLUEPRINT);

    let submissions: Vec<Value> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().ends_with(":predictLongRunning"))
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(submissions.len(), 2);
    assert!(submissions[0]["instances"][0].get("image").is_none());
    assert_eq!(submissions[1]["instances"][0]["image"]["bytesBase64Encoded"], STANDARD.encode(b"jpeg"));
    assert_eq!(submissions[1]["parameters"]["durationSeconds"], 8);
    let prompt = submissions[1]["instances"][0]["prompt"].as_str().unwrap();
    assert!(prompt.contains("Now it pays rent."));
    assert!(!prompt.contains("This screen was dead."));
}

#[test]
fn captions_from_a_blueprint_stay_inside_a_vertical_frame() {
    if !Path::new(DEFAULT_FONT_FILE).exists() {
        return;
    }
    let bp = Blueprint::from_json(
        r#"{
            "id": "captions",
            "scene_breakdown": [{"scene_number": 1, "duration_sec": 8, "scene_type": "initial", "prompt_text": "x"}],
            "caption_overlay": [
                {"t_start": 0, "t_end": 3, "text": "I turned a dead restaurant TV into a side hustle that pays every single week"},
                {"t_start": 2, "t_end": 5, "text": "$300/week", "emphasis_tokens": ["$300"]},
                {"t_start": 5, "t_end": 8, "text": "Link in bio", "style": "large"},
                {"t_start": 6, "t_end": 7, "text": "   "}
            ]
        }"#,
    )
    .unwrap();

    let engine = CaptionOverlayEngine::new(CaptionSettings::default());
    let (placements, skipped) = engine.plan(&bp.caption_overlay, 1080, 1920);

    assert_eq!(skipped, 1);
    assert_eq!(placements.len(), 3);
    assert!(placements[0].lines.len() > 1);
    assert_eq!(placements[1].preset, StylePreset::Emphasis);
    assert_eq!(placements[2].preset, StylePreset::Large);
    for p in &placements {
        assert!(p.x >= 0.0 && p.y >= 0.0);
        assert!(p.x + p.text_width <= 1080.0);
        assert!(p.y + p.text_height <= 1920.0);
    }
}
