use rust_mlpp::{
    Activation, Adversary, CancelToken, Cost, Dataset, DenseBuffer, DualSvc, EpochReport, Gan,
    Kernel, Matrix, MultiOutputNetwork, NetworkBuilder, Optimizer, Parameters, Regression, Silent,
    TrainConfig, TrainState,
};

fn line() -> Dataset {
    let xs: Vec<Vec<f64>> = (1..=10).map(|i| vec![i as f64 / 10.0]).collect();
    let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x[0]).collect();
    Dataset::from_rows(&xs, &ys).unwrap()
}

#[test]
fn full_batch_cost_never_increases_on_a_line() {
    let mut model = Regression::linear(line()).unwrap().with_seed(3);
    let mut costs = Vec::new();
    let mut record = |r: &EpochReport, _: &dyn Parameters| costs.push((r.previous_cost, r.cost));

    let report = model
        .gradient_descent(&TrainConfig::new(0.5, 1000), &mut record)
        .unwrap();

    assert_eq!(report.epochs_run, 1000);
    assert_eq!(costs.len(), 1000);
    for (before, after) in costs {
        assert!(
            after <= before + 1e-12,
            "cost rose from {before} to {after}"
        );
    }
    assert!(report.final_cost < 1e-6);
    assert_eq!(model.state(), TrainState::Stopped);
}

#[test]
fn cancelled_run_stops_without_updates() {
    let mut model = Regression::linear(line()).unwrap().with_seed(1);
    let before = model.weights().clone();

    let token = CancelToken::new();
    token.cancel();
    let cfg = TrainConfig::new(0.1, 50).with_cancel(token);
    let report = model.gradient_descent(&cfg, &mut Silent).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.epochs_run, 0);
    assert_eq!(model.weights(), &before);
    assert_eq!(model.state(), TrainState::Stopped);
}

#[test]
fn network_fits_a_line_with_mini_batches() {
    let mut net = NetworkBuilder::new(line())
        .add_layer(4, Activation::Tanh)
        .unwrap()
        .output(Activation::Linear, Cost::Mse)
        .unwrap()
        .build_with_seed(7)
        .unwrap();

    let initial = {
        net.forward_pass().unwrap();
        net.cost().unwrap()
    };
    let cfg = TrainConfig::new(0.05, 300)
        .with_mini_batch_size(3)
        .with_seed(7);
    let report = net.mbgd(&cfg, &mut Silent).unwrap();
    assert!(report.final_cost.is_finite());
    assert!(net.cost().unwrap() < initial);
}

#[test]
fn softmax_network_classifies_one_hot_targets() {
    let xs = vec![
        vec![1.0, 0.0],
        vec![0.9, 0.1],
        vec![0.0, 1.0],
        vec![0.1, 0.9],
        vec![-1.0, -1.0],
        vec![-0.9, -1.1],
    ];
    let ys = vec![
        vec![1.0, 0.0, 0.0],
        vec![1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
        vec![0.0, 0.0, 1.0],
    ];
    let mut net = MultiOutputNetwork::new(
        Matrix::from_rows(&xs).unwrap(),
        Matrix::from_rows(&ys).unwrap(),
    )
    .unwrap()
    .with_seed(11)
    .with_optimizer(Optimizer::adam())
    .unwrap();
    net.add_layer(5, Activation::Tanh).unwrap();
    net.add_output_layer(Activation::Softmax, Cost::CrossEntropy)
        .unwrap();

    let report = net
        .gradient_descent(&TrainConfig::new(0.05, 400), &mut Silent)
        .unwrap();
    assert!(report.final_cost < report.initial_cost);
    assert_eq!(net.score().unwrap(), 1.0);
    assert_eq!(net.parameters().len(), 2);
}

#[test]
fn gan_generates_samples_shaped_like_the_data() {
    let real = Matrix::from_rows(
        &(0..12)
            .map(|i| vec![1.0 + 0.01 * i as f64, -1.0, 0.5])
            .collect::<Vec<_>>(),
    )
    .unwrap();
    let mut gan = Gan::new(real, 4, Adversary::wasserstein())
        .unwrap()
        .with_seed(5);
    gan.add_layer(8, Activation::Tanh).unwrap();
    gan.add_layer(3, Activation::Linear).unwrap();
    gan.add_layer(6, Activation::Tanh).unwrap();
    gan.add_output_layer().unwrap();

    gan.gradient_descent(&TrainConfig::new(0.01, 5), &mut Silent)
        .unwrap();
    let samples = gan.generate_example(9).unwrap();
    assert_eq!(samples.shape(), (9, 3));
    assert!(samples.as_slice().iter().all(|v| v.is_finite()));
}

#[test]
fn svm_multipliers_stay_in_the_box() {
    let xs = vec![
        vec![2.0, 2.0],
        vec![3.0, 3.0],
        vec![2.5, 3.5],
        vec![-2.0, -2.0],
        vec![-3.0, -2.5],
        vec![-2.5, -3.5],
    ];
    let data = Dataset::from_rows(&xs, &[1.0, 1.0, 1.0, -1.0, -1.0, -1.0]).unwrap();
    let c = 0.5;
    let mut svc = DualSvc::new(data, c, Kernel::Linear).unwrap().with_seed(2);

    let report = svc
        .gradient_descent(&TrainConfig::new(0.01, 100), &mut Silent)
        .unwrap();
    assert!(svc.alpha().iter().all(|&a| (0.0..=c).contains(&a)));
    assert!(report.final_cost < report.initial_cost);
}
