use winnow::{
    ascii::{alpha1, dec_uint, space0},
    combinator::{alt, dispatch, empty, fail, opt, preceded, rest, separated},
    prelude::*,
    token::take_till,
};

#[derive(Debug)]
pub enum Command<'a> {
    Gcodes(Vec<&'a str>),
    PrintSdFile(&'a str),
    Pause,
    Resume,
    Cancel,
    Status,
    Connect(&'a str, Option<u32>),
    ConnectVirtual,
    Disconnect,
    Help,
    Version,
    Clear,
    Quit,
    Unrecognized,
}

fn parse_gcodes<'a>(input: &mut &'a str) -> PResult<Vec<&'a str>> {
    separated(0.., take_till(1.., ';'), ';').parse_next(input)
}

fn inner_command<'a>(input: &mut &'a str) -> PResult<Command<'a>> {
    let explicit = opt(":").parse_next(input)?;
    let command = opt(dispatch! {alpha1;
        "print" => preceded(space0, rest).map(Command::PrintSdFile),
        "pause" => empty.map(|_| Command::Pause),
        "resume" => empty.map(|_| Command::Resume),
        "cancel" => empty.map(|_| Command::Cancel),
        "status" => empty.map(|_| Command::Status),
        "connect" => (take_till(1.., [' ']), opt(preceded(' ', dec_uint))).map(|(path, baud)| Command::Connect(path, baud)),
        "virtual" => empty.map(|_| Command::ConnectVirtual),
        "disconnect" => empty.map(|_| Command::Disconnect),
        "send" => preceded(space0, parse_gcodes).map(Command::Gcodes),
        "help" => empty.map(|_| Command::Help),
        "version" => empty.map(|_| Command::Version),
        "clear" => empty.map(|_| Command::Clear),
        "quit" => empty.map(|_| Command::Quit),
        _ => empty.map(|_| Command::Unrecognized)
    })
    .parse_next(input)?;
    match (explicit, command) {
        (None, Some(Command::Unrecognized)) => fail.parse_next(input),
        (_, None) => Ok(Command::Unrecognized),
        (_, Some(command)) => Ok(command),
    }
}

/// Parses one console input line. Anything not recognized as an explicit
/// (`:`-prefixed or keyword-led) command is sent straight to the printer as
/// gcode, separated on `;` for multiple commands per line.
pub fn parse_command<'a>(input: &mut &'a str) -> PResult<Command<'a>> {
    alt((inner_command, parse_gcodes.map(Command::Gcodes))).parse_next(input)
}

pub fn help_text() -> &'static str {
    "
    commands can be explicitly invoked with ':', e.g. ':status'
    if ':' is not used, an unrecognized command is sent to the connected printer as gcode.

    Multiple gcodes can be sent on the same line by separating with ';'.

    Available commands:
    help
    version
    status
    print <sd filename>
    pause
    resume
    cancel
    connect <path> <baud?>
    virtual            (connect to an in-process simulated printer)
    disconnect
    clear
    quit
"
}

pub fn version_text() -> String {
    const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");
    format!("printhost-console version {}\n", VERSION.unwrap_or("???"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bare_line_is_gcodes() {
        let parsed = parse_command.parse("G28;G1 X10").unwrap();
        assert!(matches!(parsed, Command::Gcodes(codes) if codes == vec!["G28", "G1 X10"]));
    }

    #[test]
    fn explicit_status_is_recognized() {
        assert!(matches!(parse_command.parse(":status").unwrap(), Command::Status));
    }

    #[test]
    fn connect_parses_path_and_optional_baud() {
        match parse_command.parse(":connect /dev/ttyUSB0 115200").unwrap() {
            Command::Connect(path, baud) => {
                assert_eq!(path, "/dev/ttyUSB0");
                assert_eq!(baud, Some(115200));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
