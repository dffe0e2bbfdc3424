mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockTransport, Reply};
use futures_util::StreamExt;
use llm_gateway::multiplex::{DONE_FRAME, SseFrames};
use llm_gateway::provider::{OllamaProvider, OpenAiChatProvider};
use llm_gateway::{ChatRequest, ChatService, ErrorKind, FinishReason, Message, ProviderKind, StreamChunk};
use serde_json::{Value, json};

fn openai(transport: Arc<MockTransport>, timeout: Duration) -> ChatService {
    ChatService::builder()
        .register(OpenAiChatProvider::new(transport, "sk-test-0123456789"))
        .request_timeout(timeout)
        .build()
}

fn ask() -> ChatRequest {
    ChatRequest::new(vec![Message::user("Tell me a story.")]).with_stream(true)
}

fn story_frames() -> Reply {
    Reply::raw(&[
        "data: {\"choices\":[{\"delta\":{\"content\":\"Once\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" upon\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" a time\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    ])
}

#[tokio::test]
async fn dropping_the_stream_closes_the_upstream_connection() {
    let transport = MockTransport::new(vec![
        Reply::raw(&["data: {\"choices\":[{\"delta\":{\"content\":\"Once\"}}]}\n\n"]).held_open(),
    ]);
    let service = openai(transport.clone(), Duration::from_secs(5));

    let mut stream = service.generate_stream(&ask());
    let first = stream.next().await.expect("first chunk");
    assert_eq!(first.delta.as_deref(), Some("Once"));
    assert_eq!(transport.open_bodies(), 1);

    drop(stream);
    assert_eq!(transport.open_bodies(), 0);
}

#[tokio::test]
async fn dropping_an_ollama_stream_closes_the_connection() {
    let transport = MockTransport::new(vec![
        Reply::ndjson(&[json!({"message": {"role": "assistant", "content": "Once"}, "done": false})])
            .held_open(),
    ]);
    let service = ChatService::builder()
        .register(OllamaProvider::new(transport.clone()))
        .default_provider(ProviderKind::Ollama)
        .build();

    let mut stream = service.generate_stream(&ask());
    assert_eq!(stream.next().await.unwrap().delta.as_deref(), Some("Once"));
    drop(stream);
    assert_eq!(transport.open_bodies(), 0);
}

#[tokio::test]
async fn silent_upstream_times_out_before_first_chunk() {
    let transport = MockTransport::new(vec![story_frames().with_first_delay(Duration::from_millis(500))]);
    let service = openai(transport.clone(), Duration::from_millis(50));

    let chunks: Vec<StreamChunk> = service.generate_stream(&ask()).collect().await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].error.as_ref().map(|e| e.kind), Some(ErrorKind::UpstreamTimeout));
    assert_eq!(transport.open_bodies(), 0);
}

#[tokio::test]
async fn stalled_upstream_without_frames_times_out() {
    let transport = MockTransport::new(vec![Reply::raw(&[]).held_open()]);
    let service = openai(transport.clone(), Duration::from_millis(50));

    let chunks: Vec<StreamChunk> = service.generate_stream(&ask()).collect().await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].error.as_ref().map(|e| e.kind), Some(ErrorKind::UpstreamTimeout));
    assert_eq!(transport.open_bodies(), 0);
}

#[tokio::test]
async fn active_stream_outlives_the_first_chunk_timeout() {
    let transport = MockTransport::new(vec![story_frames().with_frame_delay(Duration::from_millis(80))]);
    let service = openai(transport, Duration::from_millis(100));

    let chunks: Vec<StreamChunk> = service.generate_stream(&ask()).collect().await;
    let text: String = chunks.iter().filter_map(|chunk| chunk.delta.clone()).collect();
    assert_eq!(text, "Once upon a time");
    assert_eq!(chunks.last().unwrap().finish_reason, Some(FinishReason::Stop));
}

#[tokio::test]
async fn buffered_call_uses_whole_call_timeout() {
    let transport = MockTransport::new(vec![
        Reply::json(200, json!({"choices": [{"message": {"content": "late"}, "finish_reason": "stop"}]}))
            .with_first_delay(Duration::from_millis(300)),
    ]);
    let err = openai(transport, Duration::from_millis(50))
        .generate(&ask())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
    assert_eq!(err.status_code(), 504);
}

#[tokio::test]
async fn concurrent_streams_do_not_interfere() {
    let transport = MockTransport::new(vec![story_frames(), story_frames()]);
    let service = Arc::new(openai(transport.clone(), Duration::from_secs(5)));

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .generate_stream(&ask())
                    .filter_map(|chunk| async move { chunk.delta })
                    .collect::<String>()
                    .await
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), "Once upon a time");
    }
    assert_eq!(transport.request_count(), 2);
    assert_eq!(transport.open_bodies(), 0);
}

fn frame_json(frame: &str) -> Value {
    let data = frame
        .strip_prefix("data: ")
        .and_then(|rest| rest.strip_suffix("\n\n"))
        .expect("sse frame");
    serde_json::from_str(data).expect("json frame")
}

#[tokio::test]
async fn multiplexed_stream_ends_with_exactly_one_done() {
    let transport = MockTransport::new(vec![story_frames()]);
    let service = openai(transport, Duration::from_secs(5));

    let frames: Vec<String> = SseFrames::new(service.generate_stream(&ask())).collect().await;
    assert_eq!(frames.len(), 5, "{frames:?}");
    assert_eq!(frame_json(&frames[0])["choices"][0]["delta"]["content"], "Once");
    assert_eq!(frame_json(&frames[2])["choices"][0]["delta"]["content"], " a time");
    assert_eq!(frame_json(&frames[3])["choices"][0]["finish_reason"], "stop");
    assert_eq!(frames.iter().filter(|frame| frame.as_str() == DONE_FRAME).count(), 1);
    assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
}

#[tokio::test]
async fn multiplexed_error_terminal_is_wire_compatible() {
    let transport = MockTransport::new(vec![Reply::json(
        401,
        json!({"error": {"message": "Incorrect API key provided"}}),
    )]);
    let service = openai(transport, Duration::from_secs(5));

    let frames: Vec<String> = SseFrames::new(service.generate_stream(&ask())).collect().await;
    assert_eq!(frames.len(), 2);
    let terminal = frame_json(&frames[0]);
    assert_eq!(terminal["choices"][0]["finish_reason"], "error");
    assert_eq!(terminal["error"]["kind"], "upstream_auth_error");
    assert_eq!(frames[1], DONE_FRAME);
}
