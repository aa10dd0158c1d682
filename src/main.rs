use clap::Parser;
use sercom::config::BAUD_RATES;
use sercom::error::{Error, PortError, ValidationError};
use sercom::transport;
use sercom::{Parity, PortConfig, SerialTransport, Session, SessionEvent, TerminalConfig, TextEncoding};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest wait between two checks of the input line channel.
const IDLE_WAIT: Duration = Duration::from_millis(10);

// Command-line flags; anything given here overrides the settings file.
#[derive(Parser, Debug)]
#[command(name = "sercom_cli", about = "Line-oriented serial port terminal")]
struct Args {
    /// Serial port to open; prompts when omitted
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    #[arg(long)]
    data_bits: Option<u8>,

    #[arg(long)]
    stop_bits: Option<u8>,

    /// none, odd or even
    #[arg(long)]
    parity: Option<Parity>,

    /// ascii, utf-8, utf-16, utf-32 or gbk
    #[arg(short, long)]
    encoding: Option<TextEncoding>,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List serial ports and exit
    #[arg(short, long)]
    list: bool,
}

// The main entry point for the terminal application.
fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    if args.list {
        print_ports();
        return;
    }

    println!("=========================");
    println!("     Serial Terminal     ");
    println!("=========================");

    let mut settings = match &args.config {
        Some(path) => match TerminalConfig::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("[ERROR] {}", e);
                return;
            }
        },
        None => TerminalConfig::default(),
    };
    apply_args(&args, &mut settings);

    if settings.serial.port.is_empty() {
        match prompt_port_and_baud() {
            Some((port, baud)) => {
                settings.serial.port = port;
                settings.serial.baud_rate = baud;
            }
            None => return,
        }
    }

    let mut session = Session::new(Arc::new(SerialTransport::new()));
    session.apply_settings(&settings);
    if let Err(e) = session.open_port(&settings.serial) {
        eprintln!("[ERROR] {}", e);
        return;
    }

    println!("\nOpened {}. Encoding: {}.", settings.serial, session.encoding());
    println!("Type 'help' for commands, 'quit' to exit.");
    prompt();

    run_terminal(&mut session, &settings.serial, spawn_line_reader());
    session.shutdown();
}

// Copies the flags that were given onto the loaded settings.
fn apply_args(args: &Args, settings: &mut TerminalConfig) {
    if let Some(port) = &args.port {
        settings.serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        settings.serial.baud_rate = baud;
    }
    if let Some(bits) = args.data_bits {
        settings.serial.data_bits = bits;
    }
    if let Some(bits) = args.stop_bits {
        settings.serial.stop_bits = bits;
    }
    if let Some(parity) = args.parity {
        settings.serial.parity = parity;
    }
    if let Some(encoding) = args.encoding {
        settings.encoding = encoding;
    }
}

// Prints the input prompt.
fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

// Reads one trimmed line from stdin; `None` at end of input.
fn read_line() -> Option<String> {
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

// Handles `--list`.
fn print_ports() {
    match transport::list_ports() {
        Ok(ports) if ports.is_empty() => eprintln!("[ERROR] No serial ports found."),
        Ok(ports) => {
            for port in ports {
                println!("{} ({})", port.port_name, port.port_type);
            }
        }
        Err(e) => eprintln!("[ERROR] {}", e),
    }
}

// Asks for a port and a baud rate the same way the port picker does.
fn prompt_port_and_baud() -> Option<(String, u32)> {
    let ports = match transport::list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return None;
        }
    };

    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return None;
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {} ({})", i, port.port_name, port.port_type);
    }
    print!("Select a port (number): ");
    let _ = io::stdout().flush();
    let port_index: usize = match read_line()?.parse() {
        Ok(i) if i < ports.len() => i,
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            return None;
        }
    };

    println!("Available baud rates:");
    for (i, rate) in BAUD_RATES.iter().enumerate() {
        println!("  {}: {}", i, rate);
    }
    print!("Select a baud rate (number, default: 115200): ");
    let _ = io::stdout().flush();
    let baud_rate = match read_line()?.as_str() {
        "" => sercom::config::DEFAULT_BAUD_RATE,
        s => match s.parse::<usize>() {
            Ok(i) if i < BAUD_RATES.len() => BAUD_RATES[i],
            _ => {
                eprintln!("[ERROR] Invalid baud rate selection.");
                return None;
            }
        },
    };

    Some((ports[port_index].port_name.clone(), baud_rate))
}

// Stdin blocks, so lines come in on their own thread.
fn spawn_line_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

// Main loop: reader events, send timers, then at most one input line.
fn run_terminal(session: &mut Session, port: &PortConfig, lines: Receiver<String>) {
    let mut shown = 0;
    loop {
        let wait = session
            .next_deadline()
            .map_or(IDLE_WAIT, |deadline| {
                deadline.saturating_duration_since(Instant::now()).min(IDLE_WAIT)
            });

        match session.pump(wait) {
            Some(SessionEvent::Received(_)) => shown = print_received(session, shown),
            Some(SessionEvent::PortClosed) => {
                println!("\nPort closed.");
                return;
            }
            None => {}
        }

        if let Err(e) = session.poll(Instant::now()) {
            eprintln!("\n[ERROR] {}", e);
            prompt();
        }

        match lines.try_recv() {
            Ok(line) => {
                let command = line.trim();
                if command == "quit" {
                    session.close_port();
                    wait_for_close(session);
                    return;
                }
                if !command.is_empty() {
                    if let Err(e) = run_command(session, port, command) {
                        report(&e);
                    }
                    if command == "clear" || command.starts_with("rxhex") {
                        shown = 0;
                        shown = print_received(session, shown);
                    }
                }
                prompt();
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                session.close_port();
                wait_for_close(session);
                return;
            }
        }
    }
}

// Waits briefly for the reader to confirm the port is closed.
fn wait_for_close(session: &mut Session) {
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        if session.pump(IDLE_WAIT) == Some(SessionEvent::PortClosed) {
            println!("Port closed.");
            return;
        }
    }
}

// Prints the part of the receive view not shown yet and returns how much
// of it has been shown.
fn print_received(session: &Session, shown: usize) -> usize {
    let text = session.received_text();
    if let Some(new) = text.get(shown..) {
        if !new.is_empty() {
            print!("{}", new);
            let _ = io::stdout().flush();
        }
    }
    text.len()
}

// Prints an engine error the way the menus print theirs.
fn report(e: &Error) {
    match e {
        Error::Validation(ValidationError::InvalidHexFormat) => {
            eprintln!("[ERROR] Please enter hex like 'aa bb 01'.")
        }
        Error::Port(PortError::NotOpen) => eprintln!("[ERROR] Open a serial port first."),
        other => eprintln!("[ERROR] {}", other),
    }
}

// Parses an `on`/`off` argument.
fn on_off(arg: &str) -> Option<bool> {
    match arg {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

// Lists the terminal commands.
fn print_help() {
    println!("  send <text>          send text from the single slot");
    println!("  hex <aa bb ..>       send hex bytes from the single slot");
    println!("  newline on|off       append CR LF to single-slot sends");
    println!("  txhex on|off         convert the single slot between text and hex");
    println!("  slot <n> <text>      set multi slot n (1-6); prefix text with 'hex:' for hex");
    println!("  select <n> on|off    include slot n in the multi cycle");
    println!("  mnewline <n> on|off  append CR LF to sends from slot n");
    println!("  sendslot <n>         send slot n once");
    println!("  cycle <ms>           resend the single slot every ms");
    println!("  mcycle <ms>          round-robin over the selected slots every ms");
    println!("  stop                 stop every periodic send");
    println!("  file <path>          send a text file or a .json send script");
    println!("  rxhex on|off         show received data as hex");
    println!("  clear                clear received data and the receive counter");
    println!("  clearsend            clear the single slot and the send counter");
    println!("  save <path>          save received data as UTF-8");
    println!("  encoding <label>     ascii, utf-8, utf-16, utf-32, gbk");
    println!("  status               show counters and active mode");
    println!("  quit                 close the port and exit");
}

// Runs one terminal command line.
fn run_command(session: &mut Session, port: &PortConfig, command: &str) -> sercom::Result<()> {
    let (word, rest) = match command.split_once(' ') {
        Some((word, rest)) => (word, rest.trim()),
        None => (command, ""),
    };
    let now = Instant::now();

    match word {
        "help" => print_help(),
        "send" => {
            let single = session.scheduler_mut().single_mut();
            single.hex_mode = false;
            single.text = rest.to_string();
            session.scheduler_mut().send_single()?;
        }
        "hex" => {
            let single = session.scheduler_mut().single_mut();
            single.hex_mode = true;
            single.text = rest.to_string();
            session.scheduler_mut().send_single()?;
            println!("sent {}", session.scheduler().single().text);
        }
        "newline" => match on_off(rest) {
            Some(on) => session.scheduler_mut().single_mut().newline = on,
            None => eprintln!("[ERROR] Usage: newline on|off"),
        },
        "txhex" => match on_off(rest) {
            Some(on) => {
                let encoding = session.encoding();
                let single = session.scheduler_mut().single_mut();
                single.set_hex_mode(on, encoding)?;
                println!("single slot: {}", single.text);
            }
            None => eprintln!("[ERROR] Usage: txhex on|off"),
        },
        "slot" => {
            let (n, text) = rest.split_once(' ').unwrap_or((rest, ""));
            let n = parse_slot(n)?;
            let slot = session.scheduler_mut().slot_mut(n)?;
            match text.strip_prefix("hex:") {
                Some(hex) => {
                    slot.hex_mode = true;
                    slot.text = hex.trim().to_string();
                }
                None => {
                    slot.hex_mode = false;
                    slot.text = text.to_string();
                }
            }
        }
        "select" => {
            let (n, flag) = rest.split_once(' ').unwrap_or((rest, ""));
            let n = parse_slot(n)?;
            match on_off(flag.trim()) {
                Some(on) => session.scheduler_mut().slot_mut(n)?.selected = on,
                None => eprintln!("[ERROR] Usage: select <n> on|off"),
            }
        }
        "mnewline" => {
            let (n, flag) = rest.split_once(' ').unwrap_or((rest, ""));
            let n = parse_slot(n)?;
            match on_off(flag.trim()) {
                Some(on) => session.scheduler_mut().slot_mut(n)?.newline = on,
                None => eprintln!("[ERROR] Usage: mnewline <n> on|off"),
            }
        }
        "sendslot" => {
            let n = parse_slot(rest)?;
            session.scheduler_mut().send_slot(n)?;
        }
        "cycle" => {
            let ms = parse_interval(rest)?;
            session.scheduler_mut().activate_single_cycle(ms, now)?;
        }
        "mcycle" => {
            let ms = parse_interval(rest)?;
            session.scheduler_mut().activate_multi_cycle(ms, now)?;
        }
        "stop" => session.scheduler_mut().stop_all(),
        "file" => {
            let written = session.send_file(Path::new(rest), now)?;
            if session.scheduler().is_script_active() {
                println!("script playing");
            } else {
                println!("sent {} bytes", written);
            }
        }
        "rxhex" => match on_off(rest) {
            Some(on) => {
                session.set_receive_hex(on);
                println!();
            }
            None => eprintln!("[ERROR] Usage: rxhex on|off"),
        },
        "clear" => session.clear_received(),
        "clearsend" => session.clear_send(),
        "save" => {
            session.save_received(Path::new(rest))?;
            println!("saved to {}", rest);
        }
        "encoding" => match rest.parse::<TextEncoding>() {
            Ok(encoding) => session.set_encoding(encoding),
            Err(e) => eprintln!("[ERROR] {}", e),
        },
        "status" => {
            let scheduler = session.scheduler();
            let mode = if scheduler.is_single_cycle_active() {
                "single cycle"
            } else if scheduler.is_multi_cycle_active() {
                "multi cycle"
            } else if scheduler.is_script_active() {
                "script"
            } else {
                "idle"
            };
            println!("{} | {} | mode: {}", port, session.status_line(), mode);
        }
        _ => eprintln!("[ERROR] Unknown command '{}'. Type 'help'.", word),
    }
    Ok(())
}

// Slot numbers are checked by the scheduler; this only parses them.
fn parse_slot(arg: &str) -> sercom::Result<usize> {
    arg.trim()
        .parse()
        .map_err(|_| ValidationError::NoSuchSlot(0).into())
}

// A missing interval is passed through so the scheduler reports it.
fn parse_interval(arg: &str) -> sercom::Result<Option<u64>> {
    if arg.is_empty() {
        return Ok(None);
    }
    arg.parse()
        .map(Some)
        .map_err(|_| ValidationError::MissingCycleInterval.into())
}
