//! `adaptest init` — write a starter config and example pool.

use anyhow::{Context, Result};

const DEFAULT_CONFIG: &str = r#"# adaptest engine configuration
mode = "production"
max_iterations = 5
criterion = "aic"
max_concurrency = 4
models = ["1pl", "2pl", "3pl", "pcm"]

# Uncomment to stop calibration early once abilities settle:
# convergence_threshold = 0.001
"#;

const EXAMPLE_POOL: &str = r#"[
  { "item": 1, "scale": 1, "model": "2pl",
    "values": { "kind": "dichotomous", "difficulty": -1.2, "discrimination": 1.1, "guessing": 0.0 } },
  { "item": 2, "scale": 1, "model": "2pl",
    "values": { "kind": "dichotomous", "difficulty": -0.4, "discrimination": 1.6, "guessing": 0.0 } },
  { "item": 3, "scale": 1, "model": "3pl",
    "values": { "kind": "dichotomous", "difficulty": 0.3, "discrimination": 1.3, "guessing": 0.2 } },
  { "item": 4, "scale": 1, "model": "1pl",
    "values": { "kind": "dichotomous", "difficulty": 0.9, "discrimination": 1.0, "guessing": 0.0 } },
  { "item": 5, "scale": 1, "model": "pcm",
    "values": { "kind": "partial_credit", "discrimination": 1.2,
                "steps": [ { "fraction": 0.5, "difficulty": -0.3 },
                           { "fraction": 1.0, "difficulty": 0.8 } ] } },
  { "item": 6, "scale": 1, "model": "2pl", "pilot": true,
    "values": { "kind": "dichotomous", "difficulty": 0.0, "discrimination": 1.0, "guessing": 0.0 } }
]
"#;

pub fn execute() -> Result<()> {
    if std::path::Path::new("adaptest.toml").exists() {
        println!("adaptest.toml already exists, skipping");
    } else {
        std::fs::write("adaptest.toml", DEFAULT_CONFIG).context("failed to write adaptest.toml")?;
        println!("Created adaptest.toml");
    }

    if std::path::Path::new("example-pool.json").exists() {
        println!("example-pool.json already exists, skipping");
    } else {
        std::fs::write("example-pool.json", EXAMPLE_POOL)
            .context("failed to write example-pool.json")?;
        println!("Created example-pool.json");
    }

    println!("\nTry: adaptest simulate --pool example-pool.json --true-theta 0.5");
    Ok(())
}
