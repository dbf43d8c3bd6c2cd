#![cfg(feature = "serde")]

use approx::assert_relative_eq;

use rust_mlpp::serde_model::{self, save_layer};
use rust_mlpp::{
    Activation, Cost, Dataset, Error, Matrix, NetworkBuilder, ParameterFile, Parameters,
    Regression, Silent, TrainConfig,
};

fn xor() -> Dataset {
    Dataset::from_rows(
        &[
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ],
        &[0.0, 1.0, 1.0, 0.0],
    )
    .unwrap()
}

#[test]
fn network_parameters_survive_a_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");

    let mut trained = NetworkBuilder::new(xor())
        .add_layer(4, Activation::Tanh)
        .unwrap()
        .add_layer(3, Activation::ReLU)
        .unwrap()
        .output(Activation::Sigmoid, Cost::LogLoss)
        .unwrap()
        .build_with_seed(11)
        .unwrap();
    trained
        .gradient_descent(&TrainConfig::new(0.1, 20), &mut Silent)
        .unwrap();
    serde_model::save(&path, &trained).unwrap();

    let file = ParameterFile::load_json(&path).unwrap();
    assert_eq!(file.layers.len(), 3);
    assert_eq!(file.layers[0].index, 1);
    assert_eq!((file.layers[0].rows, file.layers[0].cols), (2, 4));

    let mut fresh = NetworkBuilder::new(xor())
        .add_layer(4, Activation::Tanh)
        .unwrap()
        .add_layer(3, Activation::ReLU)
        .unwrap()
        .output(Activation::Sigmoid, Cost::LogLoss)
        .unwrap()
        .build_with_seed(99)
        .unwrap();
    fresh.forward_pass().unwrap();
    serde_model::load(&path, &mut fresh).unwrap();

    let values = |m: &dyn Parameters| -> Vec<f64> {
        m.parameters()
            .into_iter()
            .flat_map(|l| l.weights.into_iter().chain(l.bias))
            .collect()
    };
    let (loaded, saved) = (values(&fresh), values(&trained));
    assert_eq!(loaded.len(), saved.len());
    for (a, b) in loaded.iter().zip(&saved) {
        assert_relative_eq!(*a, *b, max_relative = 1e-12);
    }

    let x = Matrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
    assert_relative_eq!(
        fresh.model_set_test(&x).unwrap()[0],
        trained.model_set_test(&x).unwrap()[0],
        max_relative = 1e-9
    );
}

#[test]
fn appending_layers_keeps_earlier_ones() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layers.json");

    let model = Regression::linear(xor()).unwrap().with_seed(4);
    let layer = model.parameters().remove(0);
    save_layer(&path, &layer, true).unwrap();
    save_layer(&path, &layer, true).unwrap();
    assert_eq!(ParameterFile::load_json(&path).unwrap().layers.len(), 2);

    save_layer(&path, &layer, false).unwrap();
    assert_eq!(ParameterFile::load_json(&path).unwrap().layers.len(), 1);
}

#[test]
fn loading_into_the_wrong_architecture_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("linear.json");

    let linear = Regression::linear(xor()).unwrap().with_seed(1);
    serde_model::save(&path, &linear).unwrap();

    let mut net = NetworkBuilder::new(xor())
        .add_layer(2, Activation::Tanh)
        .unwrap()
        .output(Activation::Sigmoid, Cost::LogLoss)
        .unwrap()
        .build_with_seed(0)
        .unwrap();
    assert!(matches!(
        serde_model::load(&path, &mut net),
        Err(Error::InvalidData(_))
    ));
}

#[test]
fn unknown_format_version_is_rejected() {
    let json = r#"{"format_version": 99, "layers": []}"#;
    assert!(ParameterFile::from_json_str(json).is_err());
}
