//! A companion display for the polling station: listens for tally broadcasts
//! on the LAN and prints the latest results as they arrive.

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use clap::{value_parser, Arg, ArgAction, Command};

use polling_station::broadcast::{TallyBoard, TallyMonitor, DEFAULT_PORT};

const PROGRAM_NAME: &str = "tally-monitor";

const ABOUT_TEXT: &str = "Show the live tallies broadcast by a polling station.

Frames that cannot be decrypted or decoded are skipped.";

const PORT: &str = "PORT";
const LISTEN: &str = "LISTEN";
const ONCE: &str = "ONCE";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(PORT)
                .long("port")
                .short('p')
                .help("The broadcast port configured on the station [default: 8999]")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new(LISTEN)
                .long("listen")
                .help("Local address to listen on")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Ipv4Addr))
                .default_value("0.0.0.0"),
        )
        .arg(
            Arg::new(ONCE)
                .long("once")
                .help("Exit after the first tally is received")
                .action(ArgAction::SetTrue),
        )
}

/// Render the board as a table, biggest tally first.
fn render(board: &TallyBoard) -> String {
    let mut tallies = board.tallies().to_vec();
    tallies.sort_by(|a, b| b.votes.cmp(&a.votes));
    let width = tallies
        .iter()
        .map(|t| t.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("TOTAL".len());
    let mut out = String::new();
    for tally in &tallies {
        out.push_str(&format!(
            "{:width$}  {:>6}  ({})\n",
            tally.name, tally.votes, tally.id
        ));
    }
    out.push_str(&format!("{:width$}  {:>6}\n", "TOTAL", board.total_votes()));
    out
}

#[rocket::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    let port = matches.get_one::<u16>(PORT).copied().unwrap_or(DEFAULT_PORT);
    let listen = matches
        .get_one::<Ipv4Addr>(LISTEN)
        .copied()
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    let once = matches.get_flag(ONCE);

    let addr = SocketAddr::from((listen, port));
    let mut monitor = match TallyMonitor::bind(addr).await {
        Ok(monitor) => monitor,
        Err(e) => {
            eprintln!("Could not listen on {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("Listening for tallies on {addr}");

    let mut board = TallyBoard::new();
    loop {
        match monitor.next_tally().await {
            Ok((tally, from)) => {
                if board.update(tally) {
                    println!("From {from}:\n{}", render(&board));
                }
                if once {
                    return ExitCode::SUCCESS;
                }
            }
            Err(e) => {
                eprintln!("Receive failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
}
