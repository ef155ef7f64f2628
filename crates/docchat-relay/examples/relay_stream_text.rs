use docchat_relay::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), RelayError> {
    let base_url = std::env::var("SERVER_URL")
        .map_err(|_| RelayError::Config("SERVER_URL is not set".into()))?;
    let token = std::env::var("DOCCHAT_ID_TOKEN").unwrap_or_default();

    let relay = Relay::http(RelayConfig::new(base_url).allow_anonymous(token.is_empty()))?;
    let turn = ChatTurnRequest::new(
        "Summarize the document.",
        "demo-document",
        Credential::new("demo-user", token),
    );

    let mut stream = relay.start(turn).await?;
    while let Some(event) = stream.next_event().await {
        match event {
            ClientEvent::Text(text) => print!("{text}"),
            ClientEvent::Error(message) => eprintln!("\nrelay error: {message}"),
        }
    }
    println!();
    Ok(())
}
