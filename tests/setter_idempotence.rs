use powermap::core::encoder::SceneGenerator;
use powermap::core::powermap::FRAME_SIZE;
use powermap::{AnalysisConfig, AspectRatio, MapMode, PowerMapControl, PowerMapEngine, create};

fn run(ctl: &mut PowerMapControl, eng: &mut PowerMapEngine, frames: usize) -> Vec<f32> {
    let mut scene = SceneGenerator::new(ctl.master_order(), 99)
        .with_source(120.0, -10.0, 1.0)
        .with_noise_floor(0.05);
    let mut block = Vec::new();
    for _ in 0..frames {
        scene.next_block(FRAME_SIZE, &mut block);
        eng.analyse(&block, FRAME_SIZE);
    }
    ctl.request_map_update();
    scene.next_block(FRAME_SIZE, &mut block);
    eng.analyse(&block, FRAME_SIZE);
    ctl.display_map().map
}

#[test]
fn same_final_settings_give_same_state() {
    let base = AnalysisConfig {
        display_width: 32,
        ..AnalysisConfig::default()
    };

    // A wanders through other settings before landing on the target.
    let (mut a, mut ea) = create(base.clone());
    a.set_master_order(3);
    a.set_display_width(48);
    a.set_aspect(AspectRatio::FourThree);
    a.set_mode(MapMode::Music);
    a.set_master_order(2);
    a.set_display_width(32);
    a.set_aspect(AspectRatio::default());
    a.set_mode(MapMode::Mvdr);
    a.set_map_avg(0.5);
    a.set_map_avg(0.0);

    let (mut b, mut eb) = create(base);
    b.set_master_order(2);
    b.set_mode(MapMode::Mvdr);
    b.set_map_avg(0.0);
    // repeated calls are no-ops
    b.set_master_order(2);
    b.set_mode(MapMode::Mvdr);

    a.init_codec();
    b.init_codec();

    assert_eq!(a.config(), b.config());
    assert_eq!(a.n_sh(), 9);
    assert_eq!(a.interp_n_dirs(), b.interp_n_dirs());
    assert_eq!(a.grid_n_dirs(), b.grid_n_dirs());
    assert_eq!(a.lifecycle().rebuild_count(), 1);
    assert_eq!(b.lifecycle().rebuild_count(), 1);

    let map_a = run(&mut a, &mut ea, 12);
    let map_b = run(&mut b, &mut eb, 12);
    assert_eq!(map_a.len(), map_b.len());
    assert_eq!(map_a, map_b);
}

#[test]
fn setting_the_current_value_keeps_the_codec_initialised() {
    let (mut ctl, _eng) = create(AnalysisConfig {
        display_width: 16,
        ..AnalysisConfig::default()
    });
    ctl.init(48_000.0);
    ctl.init_codec();
    let cfg = ctl.config().clone();
    ctl.init(48_000.0);
    ctl.set_master_order(cfg.master_order);
    ctl.set_display_width(cfg.display_width);
    ctl.set_hfov(cfg.hfov);
    ctl.set_aspect(cfg.aspect);
    assert!(ctl.init_codec().is_empty());
    assert_eq!(ctl.lifecycle().rebuild_count(), 1);
}
