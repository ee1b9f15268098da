//! Trainer lifecycle end to end: bind, optimize, save, resume.

use std::sync::Arc;

use candle_core::Device;
use impersonator_core::models::lifecycle::{Model, RunnerModel, TrainerModel};
use impersonator_core::models::Network;
use impersonator_core::training::{get_scheduler, lambda_rule, Adam, Optimizer};
use impersonator_core::{
    to_host, Batch, HostState, ModelError, ModelFactory, ModelOptions, RecordingSink, Tensor,
};

fn options(dir: &std::path::Path) -> ModelOptions {
    ModelOptions {
        name: "lifecycle".into(),
        checkpoints_dir: dir.to_path_buf(),
        cond_nc: 1,
        lr_g: 0.01,
        lr_d: 0.01,
        seed: 3,
        ..Default::default()
    }
}

fn batch(side: usize) -> Batch {
    let wave = |c: usize, phase: f32| {
        let values = (0..c * side * side)
            .map(|i| (i as f32 * 0.21 + phase).cos() * 0.5)
            .collect();
        Tensor::from_vec(values, (1, c, side, side), &Device::Cpu).unwrap()
    };
    Batch::new()
        .with_tensor("src_img", wave(3, 0.0))
        .with_tensor("src_cond", wave(1, 0.4))
        .with_tensor("bg_img", wave(3, 0.8))
        .with_tensor(
            "bg_mask",
            Tensor::full(1f32, (1, 1, side, side), &Device::Cpu).unwrap(),
        )
        .with_tensor("tgt_img", wave(3, 0.1))
}

fn host_states(networks: Vec<(&str, &dyn Network)>) -> Vec<(String, HostState)> {
    networks
        .into_iter()
        .map(|(label, net)| (label.to_string(), to_host(&net.state_dict().unwrap()).unwrap()))
        .collect()
}

fn trainer(name: &str, opts: ModelOptions) -> Box<dyn TrainerModel> {
    ModelFactory::create(name, Arc::new(opts), RecordingSink::new())
        .unwrap()
        .into_trainer()
        .unwrap()
}

#[test]
fn test_training_loop() {
    let tmp = tempfile::tempdir().unwrap();
    let mut model = trainer("imper_v2", options(tmp.path()));
    assert!(model.get_current_errors().is_empty());

    model.set_input(batch(6)).unwrap();
    model.set_train().unwrap();
    model.optimize_parameters().unwrap();
    let first = model.get_current_errors()["g_rec"];
    for _ in 0..100 {
        model.optimize_parameters().unwrap();
    }
    let errors = model.get_current_errors();
    assert!(errors["g_rec"] < first);
    for key in ["g_rec", "g_adv", "d_real", "d_fake"] {
        assert!(errors[key].is_finite(), "{} = {}", key, errors[key]);
    }

    let scalars = model.get_current_scalars();
    assert_eq!(scalars["lr_G"], 0.01);
    assert!(scalars.contains_key("lr_bg"));

    model.set_eval().unwrap();
    let visuals = model.test().unwrap();
    assert_eq!(visuals["fake_img"].dims(), &[1, 3, 6, 6]);
}

#[test]
fn test_resume_restores_networks_and_optimizers() {
    let tmp = tempfile::tempdir().unwrap();
    let mut model = trainer("impersonator", options(tmp.path()));
    model.set_input(batch(4)).unwrap();
    for _ in 0..3 {
        model.optimize_parameters().unwrap();
    }
    model.save("4").unwrap();
    let before = host_states(model.networks());

    let mut resumed_opts = options(tmp.path());
    resumed_opts.load_epoch = 4;
    resumed_opts.seed = 1000;
    let resumed = trainer("impersonator", resumed_opts);
    assert_eq!(before, host_states(resumed.networks()));
}

#[test]
fn test_runner_reads_trainer_checkpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let mut model = trainer("imper_v2_fixbg", options(tmp.path()));
    model.set_input(batch(4)).unwrap();
    model.optimize_parameters().unwrap();
    model.save("1").unwrap();

    let mut opts = options(tmp.path());
    opts.is_train = false;
    opts.load_epoch = 1;
    let mut runner = ModelFactory::create("imper_v2_fixbg_imitator", Arc::new(opts), RecordingSink::new())
        .unwrap()
        .into_runner()
        .unwrap();

    let trained: Vec<_> = host_states(model.networks())
        .into_iter()
        .filter(|(label, _)| label != "D")
        .collect();
    assert_eq!(trained, host_states(runner.networks()));

    let visuals = runner.infer(batch(4)).unwrap();
    assert_eq!(visuals["fake_img"].dims(), &[1, 3, 4, 4]);
    assert_eq!(
        to_host(&runner.visualize().unwrap()).unwrap(),
        to_host(&visuals).unwrap()
    );
}

#[test]
fn test_resume_without_artifacts_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let mut opts = options(tmp.path());
    opts.load_epoch = 2;
    let err = ModelFactory::create("texture", Arc::new(opts), RecordingSink::new()).unwrap_err();
    assert!(matches!(err, ModelError::CheckpointNotFound { .. }));
}

#[test]
fn test_lambda_schedule_values() {
    assert_eq!(lambda_rule(9, 0, 10, 5), 1.0);
    assert!((lambda_rule(10, 0, 10, 5) - (1.0 - 1.0 / 6.0)).abs() < 1e-12);

    let opts = ModelOptions {
        lr_policy: "lambda".into(),
        epoch_count: 0,
        niter: 10,
        niter_decay: 5,
        ..Default::default()
    };
    let mut adam = Adam::new(Vec::new(), 1.0, 0.5, 0.999).unwrap();
    let mut scheduler = get_scheduler(&mut adam, &opts).unwrap();
    for _ in 0..9 {
        scheduler.step(&mut adam, None);
    }
    assert_eq!(adam.lr(), 1.0);
    scheduler.step(&mut adam, None);
    assert!((adam.lr() - 5.0 / 6.0).abs() < 1e-12);
}

#[test]
fn test_unknown_policy() {
    let opts = ModelOptions {
        lr_policy: "not-a-policy".into(),
        ..Default::default()
    };
    let mut adam = Adam::new(Vec::new(), 1.0, 0.5, 0.999).unwrap();
    let err = get_scheduler(&mut adam, &opts).unwrap_err();
    assert!(matches!(&err, ModelError::UnsupportedPolicy(name) if name == "not-a-policy"));
    assert!(err.to_string().contains("not-a-policy"));
}
