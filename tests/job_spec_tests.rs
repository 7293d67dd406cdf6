use kiln::job::{JobSpec, MemoryLimit, Submission, TIMEOUT_CAP_MS};
use kiln::runtime::RuntimeCatalog;

fn raw_python(code: &str) -> JobSpec {
    JobSpec::new(
        Submission::RawCode {
            raw_code: code.to_string(),
        },
        "python",
    )
}

#[test]
fn test_memory_limit_parsing() {
    let mb: MemoryLimit = "512MB".parse().unwrap();
    assert_eq!(mb.megabytes(), 512);

    let gb: MemoryLimit = "2GB".parse().unwrap();
    assert_eq!(gb.megabytes(), 2048);

    // Case-insensitive with surrounding whitespace
    let lower: MemoryLimit = " 256mb ".parse().unwrap();
    assert_eq!(lower.megabytes(), 256);

    assert!("512".parse::<MemoryLimit>().is_err());
    assert!("abcMB".parse::<MemoryLimit>().is_err());
    assert!("0MB".parse::<MemoryLimit>().is_err());
}

#[test]
fn test_memory_limit_display_and_docker_arg() {
    let mb = MemoryLimit::from_mb(512);
    assert_eq!(mb.to_string(), "512MB");
    assert_eq!(mb.docker_arg(), "512m");

    let gb = MemoryLimit::from_mb(2048);
    assert_eq!(gb.to_string(), "2GB");
    assert_eq!(gb.docker_arg(), "2048m");
}

#[test]
fn test_default_memory_limit() {
    let spec = raw_python("print('hi')");
    assert_eq!(spec.memory_limit.megabytes(), 512);
}

#[test]
fn test_timeout_cap_boundary() {
    let catalog = RuntimeCatalog::builtin();

    let mut spec = raw_python("print('hi')");
    spec.timeout_ms = TIMEOUT_CAP_MS;
    assert!(spec.validate(&catalog, TIMEOUT_CAP_MS).is_ok());

    spec.timeout_ms = TIMEOUT_CAP_MS + 1;
    assert!(spec.validate(&catalog, TIMEOUT_CAP_MS).is_err());
}

#[test]
fn test_unsupported_runtime_rejected_for_raw_code() {
    let catalog = RuntimeCatalog::builtin();

    let spec = JobSpec::new(
        Submission::RawCode {
            raw_code: "puts 'hi'".to_string(),
        },
        "cobol",
    );
    assert!(spec.validate(&catalog, TIMEOUT_CAP_MS).is_err());
}

#[test]
fn test_unknown_runtime_allowed_for_custom_image() {
    let catalog = RuntimeCatalog::builtin();

    // Runtime is ignored for custom images, so any tag validates.
    let spec = JobSpec::new(
        Submission::CustomImage {
            docker_image: "mine:latest".to_string(),
        },
        "whatever",
    );
    assert!(spec.validate(&catalog, TIMEOUT_CAP_MS).is_ok());
}

#[test]
fn test_env_name_validation() {
    let catalog = RuntimeCatalog::builtin();

    let mut spec = raw_python("print('hi')");
    spec.env.insert("GOOD_NAME".to_string(), "1".to_string());
    spec.env.insert("_underscore".to_string(), "2".to_string());
    assert!(spec.validate(&catalog, TIMEOUT_CAP_MS).is_ok());

    spec.env.insert("1BAD".to_string(), "3".to_string());
    assert!(spec.validate(&catalog, TIMEOUT_CAP_MS).is_err());

    spec.env.remove("1BAD");
    spec.env.insert("BAD-DASH".to_string(), "4".to_string());
    assert!(spec.validate(&catalog, TIMEOUT_CAP_MS).is_err());
}

#[test]
fn test_empty_payload_fields_rejected() {
    let catalog = RuntimeCatalog::builtin();

    let git = JobSpec::new(
        Submission::GitRepo {
            git_link: "".to_string(),
        },
        "nodejs",
    );
    assert!(git.validate(&catalog, TIMEOUT_CAP_MS).is_err());

    let raw = JobSpec::new(
        Submission::RawCode {
            raw_code: "".to_string(),
        },
        "python",
    );
    assert!(raw.validate(&catalog, TIMEOUT_CAP_MS).is_err());

    let image = JobSpec::new(
        Submission::CustomImage {
            docker_image: "  ".to_string(),
        },
        "",
    );
    assert!(image.validate(&catalog, TIMEOUT_CAP_MS).is_err());
}

#[test]
fn test_submission_tagged_serde() {
    let spec = raw_python("print('hi')");
    let json = serde_json::to_value(&spec).unwrap();
    assert_eq!(json["submission_type"], "raw_code");
    assert_eq!(json["raw_code"], "print('hi')");
    assert_eq!(json["memory_limit"], "512MB");

    let back: JobSpec = serde_json::from_value(json).unwrap();
    match back.submission {
        Submission::RawCode { raw_code } => assert_eq!(raw_code, "print('hi')"),
        other => panic!("wrong submission variant: {other:?}"),
    }
    assert_eq!(back.timeout_ms, spec.timeout_ms);
}

#[test]
fn test_runtime_catalog_fallback() {
    let catalog = RuntimeCatalog::builtin();

    assert_eq!(catalog.lookup("python").file_name, "main.py");
    assert_eq!(catalog.lookup("PYTHON").file_name, "main.py");
    // Unknown tags resolve to the nodejs entry
    assert_eq!(catalog.lookup("fortran").file_name, "index.js");
    assert!(catalog.supports("nodejs"));
    assert!(!catalog.supports("fortran"));
}
