use std::fs;
use std::path::PathBuf;

use powermap::core::grid::{AspectRatio, HorizontalFov};
use powermap::{AnalysisConfig, AppConfig, AudioConfig, MapMode};

fn unique_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "powermap_config_restore_{}_{}",
        name,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    path
}

fn custom_config() -> AppConfig {
    AppConfig {
        audio: AudioConfig {
            sample_rate: 44_100,
            block_size: 256,
        },
        analysis: AnalysisConfig {
            master_order: 4,
            band_orders: vec![1, 2, 3],
            band_weights: vec![0.5, 0.0, 2.0],
            cov_avg: 0.8,
            map_avg: 0.6,
            mode: MapMode::CropacLcmv,
            n_sources: 3,
            hfov: HorizontalFov::Deg180,
            aspect: AspectRatio::SixteenNine,
            display_width: 64,
            cov_avg_cap: 0.95,
            eq_scale: 10.0,
            cropac_lambda: 0.5,
            mvdr_loading: 0.01,
        },
    }
}

#[test]
fn saved_config_loads_back_unchanged() {
    let path = unique_path("roundtrip");
    let cfg = custom_config();
    cfg.save(&path).expect("save config");
    let loaded = AppConfig::load(&path).expect("load config");
    assert_eq!(loaded, cfg);
    let _ = fs::remove_file(&path);
}

#[test]
fn partial_file_fills_missing_fields_with_defaults() {
    let path = unique_path("partial");
    fs::write(
        &path,
        "[analysis]\nmaster_order = 3\nmode = \"music-log\"\n",
    )
    .unwrap();
    let loaded = AppConfig::load(&path).expect("load config");
    assert_eq!(loaded.audio, AudioConfig::default());
    assert_eq!(loaded.analysis.master_order, 3);
    assert_eq!(loaded.analysis.mode, MapMode::MusicLog);
    assert_eq!(loaded.analysis.display_width, AnalysisConfig::default().display_width);
    assert!(loaded.analysis.band_orders.is_empty());
    let _ = fs::remove_file(&path);
}

#[test]
fn commented_defaults_parse_to_defaults() {
    let text = AppConfig::commented_defaults().expect("render defaults");
    assert!(text.contains("# master_order = 1"));
    let parsed: AppConfig = toml::from_str(&text).expect("parse commented defaults");
    assert_eq!(parsed, AppConfig::default());
}

#[test]
fn unknown_mode_fails_to_load() {
    let path = unique_path("bad_mode");
    fs::write(&path, "[analysis]\nmode = \"beamscan\"\n").unwrap();
    assert!(AppConfig::load(&path).is_err());
    let path_str = path.to_string_lossy().to_string();
    assert_eq!(AppConfig::load_or_default(&path_str), AppConfig::default());
    let _ = fs::remove_file(&path);
}
