//! Generate a synthetic interaction stream Parquet for trying out `dynemb train`.
//!
//! Usage: cargo run -p dynemb-cli --example gen_synthetic_stream -- data/synthetic.parquet [num_interactions]

use interactions::{InteractionEvent, InteractionStream, StreamReader, StreamWriter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NUM_ACTORS: usize = 200;
const NUM_TARGETS: usize = 50;
const FEATURE_DIM: usize = 4;

/// Each actor mostly returns to a small set of favourite targets, with an
/// occasional jump elsewhere. A rare state change follows a long burst.
fn make_events(n: usize, rng: &mut StdRng) -> Vec<InteractionEvent> {
    let favourites: Vec<[usize; 3]> = (0..NUM_ACTORS)
        .map(|_| {
            [
                rng.gen_range(0..NUM_TARGETS),
                rng.gen_range(0..NUM_TARGETS),
                rng.gen_range(0..NUM_TARGETS),
            ]
        })
        .collect();
    let mut streak = vec![0usize; NUM_ACTORS];

    let mut ts = 0.0;
    (0..n)
        .map(|_| {
            ts += rng.gen_range(0.0..10.0);
            let actor = rng.gen_range(0..NUM_ACTORS);
            let target = if rng.gen_bool(0.8) {
                favourites[actor][rng.gen_range(0..3)]
            } else {
                rng.gen_range(0..NUM_TARGETS)
            };
            streak[actor] += 1;
            let state_label = streak[actor] > 8 && rng.gen_bool(0.2);
            if state_label {
                streak[actor] = 0;
            }
            InteractionEvent {
                actor_id: actor,
                target_id: target,
                timestamp: ts,
                features: (0..FEATURE_DIM).map(|_| rng.gen::<f32>()).collect(),
                state_label,
            }
        })
        .collect()
}

fn main() {
    let mut args = std::env::args().skip(1);
    let output = args
        .next()
        .unwrap_or_else(|| "data/synthetic.parquet".to_string());
    let n: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(5_000);
    let path = std::path::PathBuf::from(&output);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }

    let mut rng = StdRng::seed_from_u64(42);
    let stream = InteractionStream::from_events(make_events(n, &mut rng)).unwrap();
    StreamWriter::write(&stream, &path).unwrap();

    let summary = StreamReader::read_summary(&path).unwrap();
    println!("Wrote synthetic stream to: {output}");
    println!("  Actors:        {}", summary.num_actors);
    println!("  Targets:       {}", summary.num_targets);
    println!("  Interactions:  {}", summary.num_interactions);
    println!("  Positive:      {}", summary.positive_labels);
    println!("  Features:      {}", summary.feature_dim);
}
