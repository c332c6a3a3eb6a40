//! Demonstrates the full pipeline against a local Ollama instance: analyze a
//! short book's cast, transform it to ALL_FEMALE, and run the High
//! quality-control loop. Requires a running `ollama serve` with a chat
//! model pulled; point `OLLAMA_MODEL`/`OLLAMA_BASE_URL` at it if it isn't
//! the default.

use castshift::config::ProviderConfig;
use castshift::data::{Book, BookMetadata, Chapter, ChapterNumber, Paragraph, QualityLevel, TransformSpec};
use castshift::logging::{init_progress_handler, ConsoleProgressHandler};
use castshift::providers::ProviderRegistry;
use castshift::{analyze, transform, CastConfig};
use std::sync::Arc;

fn sample_book() -> Book {
    Book {
        metadata: BookMetadata {
            title: Some("A Short Tale".to_string()),
            author: Some("Demo Author".to_string()),
            source: None,
            format_version: None,
        },
        chapters: vec![Chapter {
            number: ChapterNumber::Ordinal(1),
            title: Some("The Meeting".to_string()),
            paragraphs: vec![
                Paragraph::new(vec![
                    "Mr. Harold Finch walked into the quiet library.".to_string(),
                    "He was looking for his sister, Mrs. Eleanor Finch.".to_string(),
                ]),
                Paragraph::new(vec![
                    "She waved to him from behind a stack of books.".to_string(),
                    "\"Harold,\" she said, \"I found what we were looking for.\"".to_string(),
                ]),
            ],
        }],
    }
}

#[tokio::main]
async fn main() -> castshift::CastResult<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    init_progress_handler(Arc::new(ConsoleProgressHandler::verbose()));

    let provider_config = ProviderConfig::from_env();
    let registry = ProviderRegistry::from_config(&provider_config);
    let provider = registry
        .get(provider_config.provider_type)
        .expect("selected provider feature must be compiled in");

    let config = CastConfig::new().with_provider(provider_config);
    let book = sample_book();

    let characters = analyze(&book, provider.as_ref(), &config).await?;
    println!("found {} characters", characters.len());

    let spec = TransformSpec::AllFemale;
    let (transformed, report) = transform(&book, &characters, &spec, QualityLevel::High, provider.as_ref(), &config).await?;

    println!("quality score: {:.1}", report.score);
    println!("{}", castshift::render::render(&transformed.book));

    Ok(())
}
