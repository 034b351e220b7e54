use super::*;
use tempfile::TempDir;

fn pdf_upload(name: &str) -> DocumentUpload {
    DocumentUpload::new(name, b"%PDF-1.7\n%fake body".to_vec())
}

fn validation_message(result: Result<()>) -> String {
    match result {
        Err(RagError::Validation(message)) => message,
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn accepts_pdf_upload() {
    assert!(validate_upload(&pdf_upload("Handbook.pdf"), DEFAULT_MAX_UPLOAD_BYTES).is_ok());
    assert!(validate_upload(&pdf_upload("SCAN.PDF"), DEFAULT_MAX_UPLOAD_BYTES).is_ok());
}

#[test]
fn rejects_missing_name() {
    let message = validation_message(validate_upload(
        &pdf_upload("  "),
        DEFAULT_MAX_UPLOAD_BYTES,
    ));
    assert_eq!(message, "No file uploaded");
}

#[test]
fn rejects_other_extensions() {
    for name in ["notes.txt", "archive.pdf.zip", "pdf"] {
        let message =
            validation_message(validate_upload(&pdf_upload(name), DEFAULT_MAX_UPLOAD_BYTES));
        assert_eq!(message, "Only PDF files are allowed", "name: {name}");
    }
}

#[test]
fn rejects_renamed_non_pdf() {
    let upload = DocumentUpload::new("fake.pdf", b"PK\x03\x04 not a pdf".to_vec());

    let message = validation_message(validate_upload(&upload, DEFAULT_MAX_UPLOAD_BYTES));

    assert_eq!(message, "Only PDF files are allowed");
}

#[test]
fn display_name_does_not_need_pdf_extension() {
    let upload = pdf_upload("handbook.pdf").with_display_name("Employee Handbook");

    assert!(validate_upload(&upload, DEFAULT_MAX_UPLOAD_BYTES).is_ok());
    assert_eq!(upload.document_name(), "Employee Handbook");
}

#[test]
fn display_name_falls_back_to_file_name() {
    assert_eq!(pdf_upload(" Travel.pdf ").document_name(), "Travel.pdf");
    assert_eq!(
        pdf_upload("Travel.pdf")
            .with_display_name("   ")
            .document_name(),
        "Travel.pdf"
    );
}

#[test]
fn display_name_cannot_smuggle_other_files() {
    let upload = DocumentUpload::new("notes.txt", b"%PDF-1.7\n".to_vec())
        .with_display_name("Handbook.pdf");

    let message = validation_message(validate_upload(&upload, DEFAULT_MAX_UPLOAD_BYTES));

    assert_eq!(message, "Only PDF files are allowed");
}

#[test]
fn rejects_empty_and_oversize_files() {
    let empty = DocumentUpload::new("empty.pdf", Vec::new());
    assert!(validate_upload(&empty, DEFAULT_MAX_UPLOAD_BYTES).is_err());

    let upload = pdf_upload("big.pdf");
    let limit = u64::try_from(upload.bytes.len()).expect("small length") - 1;
    let message = validation_message(validate_upload(&upload, limit));
    assert!(message.contains("upload limit"));
}

#[tokio::test]
async fn staged_upload_is_removed_on_drop() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let uploads = temp_dir.path().join("uploads");

    let staged = StagedUpload::write(&uploads, b"%PDF-1.4")
        .await
        .expect("should stage upload");
    let path = staged.path().to_path_buf();

    assert!(path.starts_with(&uploads));
    assert_eq!(std::fs::read(&path).expect("staged file"), b"%PDF-1.4");

    drop(staged);

    assert!(!path.exists());
}

#[tokio::test]
async fn staged_uploads_get_unique_names() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let first = StagedUpload::write(temp_dir.path(), b"%PDF-1")
        .await
        .expect("should stage upload");
    let second = StagedUpload::write(temp_dir.path(), b"%PDF-2")
        .await
        .expect("should stage upload");

    assert_ne!(first.path(), second.path());
}

#[tokio::test]
async fn drop_tolerates_already_removed_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let staged = StagedUpload::write(temp_dir.path(), b"%PDF-1")
        .await
        .expect("should stage upload");

    std::fs::remove_file(staged.path()).expect("should remove file");
    drop(staged);
}

#[tokio::test]
async fn pdf_extractor_reports_missing_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let result = PdfExtractor
        .extract_text(&temp_dir.path().join("missing.pdf"))
        .await;

    assert!(matches!(result, Err(RagError::Extraction(_))));
}

#[tokio::test]
async fn pdf_extractor_rejects_malformed_pdf() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("broken.pdf");
    std::fs::write(&path, b"%PDF-1.7\nthis is not really a pdf").expect("should write file");

    let result = PdfExtractor.extract_text(&path).await;

    assert!(matches!(result, Err(RagError::Extraction(_))));
}
