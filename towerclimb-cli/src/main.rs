use clap::Parser;
use std::path::PathBuf;

use towerclimb_core::{run, TowerSettings};

#[derive(Debug, Parser)]
#[command(
    name = "towerclimb",
    version,
    about = "Rebuilds a game image's map graph into a randomised challenge tower"
)]
struct Args {
    /// Path to the source image (.sfc, headered dumps accepted).
    #[arg(long)]
    input: PathBuf,

    /// Directory the per-seed output folder is created in.
    #[arg(long)]
    output: PathBuf,

    #[arg(long)]
    seed: u64,

    /// Number of floors to synthesize (2-99).
    #[arg(long, default_value_t = 99)]
    floors: u32,

    #[arg(long, default_value_t = true)]
    allow_save_points: bool,

    #[arg(long, default_value_t = true)]
    allow_inns: bool,

    #[arg(long, default_value_t = true)]
    allow_weapon_shops: bool,

    #[arg(long, default_value_t = true)]
    allow_armor_shops: bool,

    #[arg(long, default_value_t = true)]
    allow_relic_shops: bool,

    #[arg(long, default_value_t = true)]
    allow_item_shops: bool,

    /// Also write spoiler_log.txt and settings.json next to the image.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let settings = TowerSettings {
        seed: args.seed,
        floors: args.floors,
        allow_save_points: args.allow_save_points,
        allow_inns: args.allow_inns,
        allow_weapon_shops: args.allow_weapon_shops,
        allow_armor_shops: args.allow_armor_shops,
        allow_relic_shops: args.allow_relic_shops,
        allow_item_shops: args.allow_item_shops,
        debug: args.debug,
        input_path: args.input,
        output_path: args.output,
    };

    if let Err(err) = run(settings) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
