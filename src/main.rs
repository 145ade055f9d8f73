use std::fs;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use instant::{Duration, Instant};

use autofill::{
    parse_template_string, render_grid, AutofillConfig, AutofillError, AutofillEvent, Autofiller,
    WordIndex,
};

/// Fill a crossword template from a scored word list
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Template file: one row per line, `#` for blocks, `.` for open cells, `[XY]` for rebuses
    template: String,

    /// Word list file (`word;score` or `word,score` per line)
    #[arg(short = 'w', long)]
    word_list: String,

    /// Skip words scoring below this
    #[arg(short = 'm', long, default_value_t = 0.0)]
    min_score: f32,

    /// Milliseconds of search per step
    #[arg(long, default_value_t = 50)]
    slice_ms: u64,

    /// How many second-best choices a branch may take
    #[arg(short = 'd', long, default_value_t = 3)]
    discrepancies: usize,

    /// Give up after this many seconds and report the best fill so far
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    autofill::log::init_logger(cli.debug);

    match try_main(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("No fill found");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e}");
            // A malformed template is a usage error; anything else is a runtime failure.
            let bad_template = e.downcast_ref::<AutofillError>().map_or(false, AutofillError::is_template_error);
            if bad_template {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Run the fill, printing each improvement as it arrives. Returns whether any fill was found.
fn try_main(cli: &Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let (cells, width, height) = parse_template_string(&fs::read_to_string(&cli.template)?)?;

    let t_load = Instant::now();
    let index = Rc::new(WordIndex::load_from_path(&cli.word_list, cli.min_score)?);
    log::info!("loaded {} words in {:.3}s", index.len(), t_load.elapsed().as_secs_f64());

    let config = AutofillConfig {
        time_slice: Duration::from_millis(cli.slice_ms),
        discrepancy_budget: cli.discrepancies,
        ..AutofillConfig::default()
    };
    let mut autofiller = Autofiller::new(&cells, width, height, index, config);
    if let Some(err) = autofiller.failure() {
        return Err(err.to_string().into());
    }

    let deadline = cli.deadline_secs.map(Duration::from_secs);
    let start = Instant::now();

    'stepping: loop {
        for event in autofiller.step() {
            match event {
                AutofillEvent::Result { solution, .. } => {
                    println!("{}\n", render_grid(&solution, width));
                }
                AutofillEvent::Complete => break 'stepping,
            }
        }

        if deadline.map_or(false, |deadline| start.elapsed() >= deadline) {
            log::warn!("deadline reached, stopping with the best fill so far");
            break;
        }
    }

    eprintln!("{:?}", autofiller.statistics());
    Ok(autofiller.solution().is_some())
}
