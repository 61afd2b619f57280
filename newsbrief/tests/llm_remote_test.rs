use newsbrief::llm::remote::RemoteLlmProvider;
use newsbrief::llm::{LlmProvider, LlmRequest};

fn completion(content: &str) -> String {
    serde_json::json!({
        "model": "deepseek-chat",
        "choices": [{
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150 }
    })
    .to_string()
}

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("This is a test response"))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "deepseek-chat");

    let request = LlmRequest {
        prompt: "Test prompt".to_string(),
        max_tokens: Some(100),
        temperature: Some(0.7),
        timeout_seconds: Some(10),
    };

    let response = provider.generate(request).await.unwrap();
    assert_eq!(response.content, "This is a test response");
    assert_eq!(response.usage.prompt_tokens, 100);
    assert_eq!(response.usage.total_tokens, 150);
    assert_eq!(response.model, "deepseek-chat");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_summarize_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion(
            "```json\n{\"translated_title\": \"比特币创新高\", \"summary\": \"机构资金推动比特币上涨。\"}\n```",
        ))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "deepseek-chat");

    let summary = provider
        .summarize("Bitcoin hits record", "Institutional flows lift bitcoin.", "https://example.com/a")
        .await
        .unwrap();

    assert_eq!(summary.translated_title, "比特币创新高");
    assert_eq!(summary.summary, "机构资金推动比特币上涨。");
    assert_eq!(summary.usage.total_tokens, 150);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_summarize_rejects_non_json_answer() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("Sorry, I cannot help with that."))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "deepseek-chat");
    let result = provider.summarize("Bitcoin", "", "https://example.com/a").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_remote_provider_error_handling() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "deepseek-chat");

    let request = LlmRequest {
        prompt: "Test".to_string(),
        max_tokens: None,
        temperature: None,
        timeout_seconds: None,
    };

    let err = provider.generate(request).await.unwrap_err();
    assert!(err.to_string().contains("429"));

    mock.assert_async().await;
}
