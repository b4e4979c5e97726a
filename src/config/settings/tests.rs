use super::*;
use crate::Facet;
use crate::index::IndexManager;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "127.0.0.1");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.vision_model, "gemma3:27b");
    assert_eq!(config.search.index_kind, IndexAlgorithm::Flat);
    assert_eq!(config.search.max_results, 6);
    assert_eq!(config.search.default_k, 50);
    assert!(config.search.default_k >= config.search.max_results);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embedding_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.temperature = 3.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.search.nprobe = invalid_config.search.nlist + 1;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidNprobe(_, _))
    ));

    let mut invalid_config = config;
    invalid_config.search.max_results = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidMaxResults(0))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://127.0.0.1:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let toml_str = r#"
        [search]
        index_kind = "ivf"
        nlist = 16
        nprobe = 4
    "#;
    let config: Config = toml::from_str(toml_str).expect("should parse partial toml");

    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(
        config.search.index_kind(),
        IndexKind::Ivf {
            nlist: 16,
            nprobe: 4
        }
    );
    assert_eq!(config.search.max_results, 6);
}

#[test]
fn setter_validation() {
    let mut ollama = OllamaConfig::default();

    assert!(ollama.set_protocol("https".to_string()).is_ok());
    assert!(ollama.set_host("example.com".to_string()).is_ok());
    assert!(ollama.set_port(8080).is_ok());
    assert!(ollama.set_embedding_model("new-model".to_string()).is_ok());
    assert!(ollama.set_vision_model("llava:13b".to_string()).is_ok());
    assert!(ollama.set_batch_size(128).is_ok());

    assert!(ollama.set_protocol("ftp".to_string()).is_err());
    assert!(ollama.set_port(0).is_err());
    assert!(ollama.set_embedding_model(String::new()).is_err());
    assert!(ollama.set_vision_model("  ".to_string()).is_err());
    assert!(ollama.set_batch_size(0).is_err());
    assert!(ollama.set_batch_size(1001).is_err());

    let mut search = SearchConfig::default();
    assert!(search.set_nlist(4).is_ok());
    assert_eq!(search.nprobe, 4, "nprobe is clamped to the new nlist");
    assert!(search.set_nprobe(5).is_err());
    assert!(search.set_default_k(50).is_ok());
    assert!(search.set_default_k(0).is_err());
    assert!(search.set_max_results(101).is_err());
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("missing config loads defaults");

    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().join("nested"),
        ..Config::default()
    };
    config.search.set_index_kind(IndexAlgorithm::Ivf);
    config.search.set_nlist(32).expect("valid nlist");

    config.save().expect("should save config");
    let loaded = Config::load(temp_dir.path().join("nested")).expect("should load config");

    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[ollama]\nbatch_size = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn derived_paths() {
    let config = Config {
        base_dir: PathBuf::from("/data/styles"),
        ..Config::default()
    };

    assert_eq!(config.store_path(), PathBuf::from("/data/styles/catalog.bin"));
    assert_eq!(config.index_dir(), PathBuf::from("/data/styles/indexes"));
    assert_eq!(
        IndexManager::for_config(&config).index_path(Facet::Color),
        PathBuf::from("/data/styles/indexes/index4color.idx")
    );
}
