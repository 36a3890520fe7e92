use anyhow::{Result, anyhow, bail};
use rustyline::{DefaultEditor, error::ReadlineError};
use shdbg_core::{Breakpoint, CaptureApi, Debugger, Id};

use crate::{describe_state, parse_breakpoint};

fn print_repl_help() {
    eprintln!("Commands:");
    eprintln!("  s | step [N]        advance N lock-step rounds (default 1)");
    eprintln!("  c | continue        run to the next breakpoint or the end");
    eprintln!("  b | break N|line:N  stop before instruction N or source line N");
    eprintln!("  bl | breakpoints    list breakpoints");
    eprintln!("  clear               remove every breakpoint");
    eprintln!("  p | print %ID       value of an id on the inspected lane");
    eprintln!("  locals              source variables in scope");
    eprintln!("  bt | stack          call stack, innermost first");
    eprintln!("  lanes               status of every lane");
    eprintln!("  msgs                diagnostics raised since the last msgs");
    eprintln!("  w | where           next instruction");
    eprintln!("  r | restart         start over from the entry point");
    eprintln!("  :help, :quit | :exit | :q");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplCommand {
    Step(usize),
    Continue,
    Break(Breakpoint),
    ListBreakpoints,
    ClearBreakpoints,
    Print(Id),
    Locals,
    Stack,
    Lanes,
    Messages,
    Where,
    Restart,
    Help,
    Quit,
}

fn parse_id(raw: &str) -> Result<Id> {
    let digits = raw.strip_prefix('%').unwrap_or(raw);
    digits.parse::<u32>().map(Id::new).map_err(|_| anyhow!("invalid id '{raw}'"))
}

pub(crate) fn parse_command(line: &str) -> Result<ReplCommand> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        bail!("empty command");
    };
    let arg = words.next();
    if words.next().is_some() {
        bail!("too many arguments to '{head}'");
    }
    Ok(match (head, arg) {
        ("s" | "step", None) => ReplCommand::Step(1),
        ("s" | "step", Some(n)) => ReplCommand::Step(n.parse().map_err(|_| anyhow!("invalid step count '{n}'"))?),
        ("c" | "continue", None) => ReplCommand::Continue,
        ("b" | "break", Some(bp)) => ReplCommand::Break(parse_breakpoint(bp).map_err(|e| anyhow!(e))?),
        ("bl" | "breakpoints", None) => ReplCommand::ListBreakpoints,
        ("clear", None) => ReplCommand::ClearBreakpoints,
        ("p" | "print", Some(id)) => ReplCommand::Print(parse_id(id)?),
        ("locals", None) => ReplCommand::Locals,
        ("bt" | "stack", None) => ReplCommand::Stack,
        ("lanes", None) => ReplCommand::Lanes,
        ("msgs", None) => ReplCommand::Messages,
        ("w" | "where", None) => ReplCommand::Where,
        ("r" | "restart", None) => ReplCommand::Restart,
        (":help" | "help", None) => ReplCommand::Help,
        (":quit" | ":exit" | ":q", None) => ReplCommand::Quit,
        _ => bail!("Unknown command '{}'. Type :help for help.", line.trim()),
    })
}

fn breakpoint_label(bp: &Breakpoint) -> String {
    match bp {
        Breakpoint::Instruction(pc) => format!("instruction {pc}"),
        Breakpoint::Line(line) => format!("line {line}"),
    }
}

fn print_location(dbg: &Debugger<CaptureApi>) {
    if dbg.is_finished() {
        println!("(finished)");
        return;
    }
    let pc = dbg.active_lane().pc();
    let text = dbg.program().instruction(pc).map(|f| f.inst.to_string()).unwrap_or_default();
    println!("=> {pc:>4}: {text}");
}

pub fn run(mut dbg: Debugger<CaptureApi>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut breakpoints: Vec<Breakpoint> = Vec::new();
    let active = dbg.trace().active_lane;

    {
        let trace = dbg.trace();
        println!(
            "{} ({:?}), {} lane(s), inspecting lane {}",
            trace.entry_point, trace.stage, trace.lane_count, active
        );
    }
    print_repl_help();
    print_location(&dbg);

    loop {
        let line = match rl.readline("(shdbg) ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                eprintln!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!();
                return Ok(());
            }
            Err(e) => {
                eprintln!("Readline error: {}", e);
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(trimmed);

        let command = match parse_command(trimmed) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match command {
            ReplCommand::Quit => return Ok(()),
            ReplCommand::Help => print_repl_help(),
            ReplCommand::Step(count) => {
                for _ in 0..count {
                    let Some(state) = dbg.step() else {
                        break;
                    };
                    println!("{}", describe_state(&state, dbg.program(), active));
                }
                print_location(&dbg);
            }
            ReplCommand::Continue => {
                let states = dbg.run_until(&breakpoints);
                if let Some(last) = states.last() {
                    println!("{}", describe_state(last, dbg.program(), active));
                }
                println!("ran {} step(s)", states.len());
                print_location(&dbg);
            }
            ReplCommand::Break(bp) => {
                if !breakpoints.contains(&bp) {
                    breakpoints.push(bp);
                }
                println!("breakpoint at {}", breakpoint_label(&bp));
            }
            ReplCommand::ListBreakpoints => {
                if breakpoints.is_empty() {
                    println!("no breakpoints");
                }
                for (i, bp) in breakpoints.iter().enumerate() {
                    println!("{i}: {}", breakpoint_label(bp));
                }
            }
            ReplCommand::ClearBreakpoints => {
                breakpoints.clear();
                println!("breakpoints cleared");
            }
            ReplCommand::Print(id) => {
                let value = dbg.active_lane().value(id).or_else(|| dbg.program().constant(id));
                match value {
                    Some(value) => println!("{id} {} = {}", value.name, value.value_string()),
                    None => eprintln!("{id} has no value on lane {active}"),
                }
            }
            ReplCommand::Locals => match dbg.source_variables() {
                Ok(vars) if vars.is_empty() => println!("no source variables in scope"),
                Ok(vars) => {
                    for var in vars {
                        println!("{} = {}", var.name, var.value.value_string());
                    }
                }
                Err(e) => eprintln!("Error: {e:#}"),
            },
            ReplCommand::Stack => {
                for (depth, frame) in dbg.callstack().iter().rev().enumerate() {
                    println!("#{depth} {frame}");
                }
            }
            ReplCommand::Lanes => {
                for lane in dbg.lanes() {
                    let marker = if lane.lane() == active { "*" } else { " " };
                    println!("{marker} lane {:>3} pc {:>4} {:?}", lane.lane(), lane.pc(), lane.status());
                }
            }
            ReplCommand::Messages => {
                let messages = dbg.api_mut().take_messages();
                if messages.is_empty() {
                    println!("no new messages");
                }
                for message in messages {
                    println!("{message}");
                }
            }
            ReplCommand::Where => print_location(&dbg),
            ReplCommand::Restart => match dbg.restart() {
                Ok(()) => {
                    println!("restarted");
                    print_location(&dbg);
                }
                Err(e) => eprintln!("Error: {e:#}"),
            },
        }
    }
}
