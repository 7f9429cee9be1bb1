//! Binary entrypoint that launches the consultation room server.

use std::process::ExitCode;

use consult_room::start_consult_room;

fn main() -> ExitCode {
    start_consult_room::run()
}
