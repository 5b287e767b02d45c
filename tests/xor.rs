use dagnet::{Adam, Inputs, LayerConfig, Mlp, Optimizer, RmsProp};
use ndarray::{arr2, Array2};
use ndarray_rand::rand::{rngs::StdRng, Rng, SeedableRng};

fn xor_data() -> Vec<(Inputs, Array2<f64>)> {
    [
        ([0.0, 0.0], 0.0),
        ([1.0, 0.0], 1.0),
        ([0.0, 1.0], 1.0),
        ([1.0, 1.0], 0.0),
    ]
    .iter()
    .map(|&([a, b], y)| {
        let mut x = Inputs::new();
        x.insert("input".to_owned(), arr2(&[[a], [b]]));
        (x, arr2(&[[y]]))
    })
    .collect()
}

// Two hidden layers side by side, with a skip connection from the input to
// the output.
fn xor_network<O: Optimizer>(optimizer: O, seed: u64) -> Mlp<O> {
    let mut mlp = Mlp::with_seed(optimizer, seed);
    mlp.add_layer("input", LayerConfig::input(2, 4)).unwrap();
    mlp.add_layer("hidden1", LayerConfig::hidden(4)).unwrap();
    mlp.add_layer("hidden2", LayerConfig::hidden(4)).unwrap();
    mlp.add_layer("output", LayerConfig::output(1)).unwrap();
    mlp.connect("input", "hidden1").unwrap();
    mlp.connect("input", "hidden2").unwrap();
    mlp.connect("input", "output").unwrap();
    mlp.connect("hidden1", "output").unwrap();
    mlp.connect("hidden2", "output").unwrap();
    mlp.generate().unwrap();
    mlp
}

fn max_error<O: Optimizer>(mlp: &mut Mlp<O>, data: &[(Inputs, Array2<f64>)]) -> f64 {
    data.iter()
        .map(|(x, y)| {
            mlp.feed_forward(x).unwrap();
            (mlp.output("output").unwrap()[[0, 0]] - y[[0, 0]]).abs()
        })
        .fold(0.0, f64::max)
}

fn mean_loss<O: Optimizer>(mlp: &mut Mlp<O>, data: &[(Inputs, Array2<f64>)]) -> f64 {
    data.iter()
        .map(|(x, y)| {
            mlp.feed_forward(x).unwrap();
            mlp.loss(y).unwrap()
        })
        .sum::<f64>()
        / data.len() as f64
}

// A small sigmoid network can stall in a local minimum, so a few seeds are
// tried in order. Every seed must at least lower its training loss, and the
// seed that solves the task is logged.
fn solving_seed<O: Optimizer>(
    optimizer: O,
    learning_rate: f64,
    epochs: usize,
    mut train_epoch: impl FnMut(&mut Mlp<O>, &[(Inputs, Array2<f64>)], f64),
) -> Option<u64> {
    let _ = env_logger::builder().is_test(true).try_init();
    let data = xor_data();
    (0..5).find(|&seed| {
        let mut mlp = xor_network(optimizer.clone(), seed);
        let initial = mean_loss(&mut mlp, &data);
        for _ in 0..epochs {
            train_epoch(&mut mlp, &data, learning_rate);
        }
        let trained = mean_loss(&mut mlp, &data);
        let error = max_error(&mut mlp, &data);
        log::info!(
            "seed {}: loss {} -> {}, max error {}",
            seed,
            initial,
            trained,
            error
        );
        assert!(
            trained < initial,
            "seed {} did not learn: loss {} -> {}",
            seed,
            initial,
            trained
        );
        error < 0.1
    })
}

#[test]
fn adam_learns_xor_with_full_batches() {
    let seed = solving_seed(Adam::default(), 0.05, 3000, |mlp, data, lr| {
        for (x, y) in data {
            mlp.feed_forward(x).unwrap();
            mlp.gradient(x, y).unwrap();
        }
        mlp.optimize(lr).unwrap();
    });
    assert!(seed.is_some(), "no seed solved xor");
    log::info!("solved by seed {:?}", seed);
}

#[test]
fn rmsprop_learns_xor_with_sampled_batches() {
    let mut rng = StdRng::seed_from_u64(42);
    let seed = solving_seed(RmsProp::default(), 0.01, 10000, |mlp, data, lr| {
        for _ in 0..data.len() {
            let (x, y) = &data[rng.gen_range(0..data.len())];
            mlp.feed_forward(x).unwrap();
            mlp.gradient(x, y).unwrap();
        }
        mlp.optimize(lr).unwrap();
    });
    assert!(seed.is_some(), "no seed solved xor");
    log::info!("solved by seed {:?}", seed);
}
