use care_sheet_builder::{
    AnalysisType, ArtifactKind, CareSheetService, ExtractionEvent, Extractor, GeminiClient,
    GoogleWorkspaceClient, InputFile, MappingType, MemoryObjectStore, ServiceConfig, WriteMode,
    WriteRequest,
};
use dotenv::dotenv;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    println!("🚀 Starting assessment extraction example...");

    let path = std::env::args()
        .nth(1)
        .expect("usage: extract_assessment <recording-or-scan> [spreadsheet-id]");
    let spreadsheet_id = std::env::args().nth(2);

    let config = ServiceConfig::from_env();
    let api_key = config.gemini_api_key.clone().expect("GEMINI_API_KEY must be set");
    let token = config
        .google_access_token
        .clone()
        .expect("GOOGLE_ACCESS_TOKEN must be set");

    let mut gemini = GeminiClient::new(api_key);
    if let Some(model) = &config.gemini_model {
        gemini = gemini.with_model(model);
    }
    let gemini = Arc::new(gemini);
    let google = Arc::new(GoogleWorkspaceClient::new(token));

    let file_name = std::path::Path::new(&path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let file = InputFile::new(std::fs::read(&path)?, None, file_name);
    println!("📄 Loaded {} ({}, {} bytes)", file.file_name, file.mime_type, file.data.len());

    // 1. Phase-by-phase extraction with progress
    let extractor = Extractor::new(gemini.clone()).with_concurrency(config.extraction_concurrency);
    let (tx, mut rx) = mpsc::channel(32);
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ExtractionEvent::Staging { filename } => println!("⬆️  Staging {}", filename),
                ExtractionEvent::PhaseStarted { phase, label, fields } => {
                    println!("🔎 Phase {} 【{}】: {} fields", phase, label, fields)
                }
                ExtractionEvent::PhaseSucceeded { phase, extracted } => {
                    println!("✅ Phase {} returned {} values", phase, extracted)
                }
                ExtractionEvent::PhaseFailed { phase, error } => {
                    println!("⚠️  Phase {} failed: {}", phase, error)
                }
                ExtractionEvent::Finished { fields, failed_phases } => {
                    println!("🏁 {} fields extracted, {} failed phase(s)", fields, failed_phases)
                }
            }
        }
    });

    let schema = config.assessment_schema().merged(&config.assessment_part_two_schema());
    let report = extractor
        .extract_with_progress(std::slice::from_ref(&file), &schema, Some(tx))
        .await?;
    progress.await?;

    println!("\n📋 Extracted record:");
    for (field, value) in report.record.iter().take(20) {
        println!("   {}: {}", field, value);
    }
    if report.record.len() > 20 {
        println!("   … and {} more", report.record.len() - 20);
    }

    // 2. The same through the service, which also derives the genogram and body map
    let service = CareSheetService::new(config, gemini, google.clone(), Arc::new(MemoryObjectStore::new()))
        .with_archive(google);
    let response = service.analyze(vec![file], AnalysisType::Assessment).await;
    if !response.success {
        println!("❌ Analysis failed: {:?}", response.error);
        return Ok(());
    }

    if let Some(id) = response.artifact_id {
        tokio::time::sleep(Duration::from_secs(20)).await;
        for kind in ArtifactKind::ALL {
            match service.artifact(id, kind).await? {
                Some(artifact) => println!("🧬 {:?}: {}", kind, serde_json::to_string_pretty(&artifact)?),
                None => println!("⏳ {:?} not ready yet", kind),
            }
        }
    }

    // 3. Write into an existing sheet, or create a new document from the template
    let data = response.data.unwrap_or_default();
    let request = match spreadsheet_id {
        Some(id) => WriteRequest {
            spreadsheet_id: Some(id),
            sheet_name: Some("アセスメントシート".to_string()),
            mapping_type: MappingType::Assessment,
            ..WriteRequest::new(data, WriteMode::Mapping)
        },
        None => WriteRequest::new(data, WriteMode::Document),
    };
    let result = service.write(request).await;
    println!("\n💾 Write result: {}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
