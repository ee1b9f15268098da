//! Factory dispatch across every registered variant.

use std::sync::Arc;

use impersonator_core::{
    ModelError, ModelEvent, ModelFactory, ModelInstance, ModelKind, ModelOptions, RecordingSink,
};

fn options(dir: &std::path::Path, is_train: bool) -> ModelOptions {
    ModelOptions {
        name: "factory".into(),
        checkpoints_dir: dir.to_path_buf(),
        is_train,
        ..Default::default()
    }
}

#[test]
fn test_every_registered_name_constructs() {
    let tmp = tempfile::tempdir().unwrap();
    for is_train in [true, false] {
        for kind in ModelKind::ALL {
            let sink = RecordingSink::new();
            let instance = ModelFactory::create(
                kind.as_str(),
                Arc::new(options(tmp.path(), is_train)),
                sink.clone(),
            )
            .unwrap_or_else(|e| panic!("{} failed: {}", kind, e));

            assert!(!instance.name().is_empty());
            assert_eq!(instance.is_train(), is_train, "{}", kind);
            assert!(!instance.networks().is_empty());
            assert!(sink.events().contains(&ModelEvent::Created {
                name: instance.name().to_string()
            }));
        }
    }
}

#[test]
fn test_personalities() {
    let tmp = tempfile::tempdir().unwrap();
    let create = |name: &str, is_train: bool| {
        ModelFactory::create(
            name,
            Arc::new(options(tmp.path(), is_train)),
            RecordingSink::new(),
        )
        .unwrap()
    };

    assert!(matches!(create("background_inpaintor", true), ModelInstance::Trainer(_)));
    assert!(matches!(create("background_inpaintor", false), ModelInstance::Runner(_)));
    assert!(matches!(create("imper_v2_fixbg_imitator", true), ModelInstance::Runner(_)));
    assert!(matches!(create("imper_v2", false), ModelInstance::Trainer(_)));

    let mut runner = create("imper_v2_fixbg_imitator", false);
    assert!(runner.as_trainer().is_none());
    assert!(runner.as_runner().is_some());
    assert_eq!(runner.name(), "Imitator");
}

#[test]
fn test_unknown_model_name() {
    let err = ModelFactory::create(
        "not-a-real-model",
        Arc::new(ModelOptions::default()),
        RecordingSink::new(),
    )
    .unwrap_err();
    assert!(matches!(&err, ModelError::UnknownModelKind(name) if name == "not-a-real-model"));
    assert_eq!(err.to_string(), "Model not-a-real-model not recognized");
}

#[test]
fn test_map_name_sets_conditioning_channels() {
    let tmp = tempfile::tempdir().unwrap();
    let mut opts = options(tmp.path(), true);
    opts.map_name = Some("par".into());
    let instance = ModelFactory::create("concat", Arc::new(opts), RecordingSink::new()).unwrap();

    let nets = instance.networks();
    let (_, g) = nets.iter().find(|(label, _)| *label == "G").unwrap();
    // src_img + 14 body-part channels
    assert_eq!(g.vars()["conv0.weight"].dims(), &[16, 17, 3, 3]);
    assert_eq!(g.vars()["conv1.weight"].dims(), &[3, 16, 3, 3]);
    let (_, d) = nets.iter().find(|(label, _)| *label == "D").unwrap();
    assert_eq!(d.vars()["conv0.weight"].dims(), &[16, 17, 3, 3]);
    assert_eq!(d.vars()["conv1.weight"].dims(), &[1, 16, 3, 3]);
}

#[test]
fn test_unsupported_policy_surfaces_from_factory() {
    let tmp = tempfile::tempdir().unwrap();
    let mut opts = options(tmp.path(), true);
    opts.lr_policy = "not-a-policy".into();
    let err = ModelFactory::create("imper_v2", Arc::new(opts), RecordingSink::new()).unwrap_err();
    assert!(matches!(err, ModelError::UnsupportedPolicy(_)));
}
