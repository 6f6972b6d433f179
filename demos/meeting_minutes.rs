use care_sheet_builder::{
    AnalysisType, CareSheetService, GeminiClient, GoogleWorkspaceClient, InputFile,
    MemoryObjectStore, MeetingType, RowOverrides, ServiceConfig, WriteMode, WriteRequest,
};
use dotenv::dotenv;
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    println!("🚀 Starting meeting minutes example...");

    let mut args = std::env::args().skip(1);
    let kind = args.next().unwrap_or_else(|| "service_meeting".to_string());
    let paths: Vec<String> = args.collect();
    if paths.is_empty() {
        println!("usage: meeting_minutes <service_meeting|management_meeting> <file>...");
        return Ok(());
    }

    let analysis: AnalysisType = kind.parse()?;
    let meeting_type = match analysis {
        AnalysisType::ManagementMeeting => MeetingType::ManagementMeeting,
        _ => MeetingType::ServiceMeeting,
    };

    let config = ServiceConfig::from_env();
    let gemini = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone().expect("GEMINI_API_KEY must be set"),
    ));
    let google = Arc::new(GoogleWorkspaceClient::new(
        config
            .google_access_token
            .clone()
            .expect("GOOGLE_ACCESS_TOKEN must be set"),
    ));
    let service = CareSheetService::new(config, gemini, google.clone(), Arc::new(MemoryObjectStore::new()))
        .with_archive(google);

    let mut files = Vec::new();
    for path in &paths {
        let name = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        files.push(InputFile::new(std::fs::read(path)?, None, name));
    }
    println!("📄 Analyzing {} file(s) as {}", files.len(), analysis);

    let response = service.analyze(files, analysis).await;
    let Some(data) = response.data.filter(|_| response.success) else {
        println!("❌ Analysis failed: {:?}", response.error);
        return Ok(());
    };
    println!("📝 Minutes:\n{}", serde_json::to_string_pretty(&data)?);

    // Master log row plus a standalone minutes document
    let request = WriteRequest {
        meeting_type: Some(meeting_type),
        overrides: RowOverrides {
            date: std::env::var("MEETING_DATE").ok(),
            time: std::env::var("MEETING_TIME").ok(),
            ..Default::default()
        },
        ..WriteRequest::new(data, WriteMode::Document)
    };
    let result = service.write(request).await;

    if result.success {
        println!("✅ Written ({} cells): {}", result.write_count, result.sheet_url.unwrap_or_default());
    } else {
        println!("❌ Write failed");
    }
    if let Some(error) = result.error {
        println!("⚠️  {}", error);
    }

    Ok(())
}
