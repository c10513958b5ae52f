use std::env;
use std::fs::File;
use std::io::prelude::*;
use std::process;

use log::{debug, info};

use zjam::game::Game;
use zjam::input::StdinInput;
use zjam::interpreter::Interpreter;
use zjam::screen::{PlainScreen, Screen, TerminalScreen};
use zjam::storage::DirStore;
use zjam::vm::VM;

fn usage(program: &str) {
    println!("zjam - Z-Machine interpreter for Infocom-era text adventures");
    println!();
    println!("Usage: {program} <story_file.z3|.dat> [--limit N]");
    println!();
    println!("  --limit N   stop after N instructions (for scripted runs)");
    println!();
    println!("Saves go to ./saves; set RUST_LOG=debug for execution traces.");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
        return Ok(());
    }
    let story_path = &args[1];

    let mut limit = None;
    if args.len() >= 4 && args[2] == "--limit" {
        limit = Some(
            args[3]
                .parse::<u64>()
                .map_err(|_| format!("invalid instruction limit: {}", args[3]))?,
        );
    }

    debug!("loading story: {story_path}");
    let mut file = match File::open(story_path) {
        Ok(file) => file,
        Err(err) => {
            match err.kind() {
                std::io::ErrorKind::NotFound => {
                    eprintln!("Error: story file not found: {story_path}");
                    eprintln!();
                    eprintln!("Check the path and that you're in the right directory.");
                }
                std::io::ErrorKind::PermissionDenied => {
                    eprintln!("Error: permission denied reading {story_path}");
                }
                _ => eprintln!("Error: cannot open {story_path}: {err}"),
            }
            process::exit(1);
        }
    };
    let mut story_bytes = Vec::new();
    file.read_to_end(&mut story_bytes)?;

    let game = Game::from_bytes(story_bytes)?;
    info!("story v{}, release {}", game.header.version, game.header.release);
    debug!("{}", game.header);

    let vm = VM::new(game)?;

    // Interactive terminals get the status-line screen; pipes get the
    // plain stream so transcripts stay clean
    let screen: Box<dyn Screen> = if atty::is(atty::Stream::Stdout) && atty::is(atty::Stream::Stdin)
    {
        Box::new(TerminalScreen::new()?)
    } else {
        Box::new(PlainScreen)
    };

    let mut interpreter = Interpreter::new(
        vm,
        screen,
        Box::new(StdinInput),
        Box::new(DirStore::new("saves")),
    );

    match interpreter.run_with_limit(limit) {
        Ok(()) => Ok(()),
        Err(err) => {
            // Fatal interpreter errors are reported and the session ends
            eprintln!("\nExecution failed: {err}");
            process::exit(1);
        }
    }
}
