use std::io::{self, Write};
use std::sync::Arc;

use timetable_sync::persistence::{
    InMemorySlotStore, SlotStore, load_slots_from_csv, load_slots_from_json, save_slots_to_csv,
    save_slots_to_json,
};
use timetable_sync::{
    AppConfig, ChangeBroker, ClockTime, ConflictQuery, DayOfWeek, ScheduleError, ScheduleSlot,
    Scope, SlotDraft, SlotFilter, SlotId, SlotService, telemetry,
};
use tokio::runtime::Runtime;

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let mut line = String::from("|");
    for (ci, cell) in cells.enumerate() {
        line.push(' ');
        line.push_str(cell);
        line.push_str(&" ".repeat(widths[ci].saturating_sub(cell.len())));
        line.push_str(" |");
    }
    line
}

fn render_slots_as_text_table(slots: &[ScheduleSlot]) -> String {
    let headers = ["id", "day", "start", "end", "class", "teacher", "subject", "room"];
    let rows: Vec<[String; 8]> = slots
        .iter()
        .map(|slot| {
            [
                slot.id.to_string(),
                slot.day_of_week.to_string(),
                slot.start_time.to_string(),
                slot.end_time.to_string(),
                slot.class_id.clone(),
                slot.teacher_id.clone(),
                slot.subject_id.clone(),
                slot.classroom_id.clone().unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (ci, cell) in row.iter().enumerate() {
            widths[ci] = widths[ci].max(cell.len());
        }
    }

    let mut sep = String::from("+");
    for w in &widths {
        sep.push_str(&"-".repeat(*w + 2));
        sep.push('+');
    }

    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&render_row(headers.iter().copied(), &widths));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for row in &rows {
        out.push_str(&render_row(row.iter().map(String::as_str), &widths));
        out.push('\n');
    }
    out.push_str(&sep);
    out.push('\n');
    out
}

fn print_help() {
    println!(
        "Commands:\n  help                               Show this help\n  show                               Show active slots\n  add <class> <teacher> <subject> <day> <HH:MM> <HH:MM> [room]\n                                     Create a slot (day 1-5 or Mon..Fri)\n  move <id> <day> <HH:MM> <HH:MM>    Reschedule a slot\n  delete <id>                        Soft-delete a slot\n  check <teacher> <day> <HH:MM> <HH:MM> [room] [exclude_id]\n                                     List slots a candidate would clash with\n  save <json|csv> <path>             Export slots\n  load <json|csv> <path>             Replace slots with a file's contents\n  quit|exit                          Exit"
    );
}

fn report_error(err: &ScheduleError) {
    match err {
        ScheduleError::Conflict { conflicts } => {
            println!("Rejected: {err}");
            print!("{}", render_slots_as_text_table(conflicts));
        }
        ScheduleError::Validation(_) => println!("Invalid: {err}"),
        _ => println!("Error: {err}"),
    }
}

struct Repl {
    runtime: Runtime,
    broker: ChangeBroker,
    store: Arc<InMemorySlotStore>,
    service: SlotService,
    scope: Scope,
}

impl Repl {
    fn new(runtime: Runtime, scope: Scope) -> Self {
        let broker = ChangeBroker::new();
        let store = Arc::new(InMemorySlotStore::new(broker.clone()));
        let service = SlotService::new(store.clone());
        Self {
            runtime,
            broker,
            store,
            service,
            scope,
        }
    }

    fn replace_slots(&mut self, slots: Vec<ScheduleSlot>) {
        self.store = Arc::new(InMemorySlotStore::with_slots(self.broker.clone(), slots));
        self.service = SlotService::new(self.store.clone());
    }

    fn active_slots(&self) -> Result<Vec<ScheduleSlot>, ScheduleError> {
        let mut slots = self
            .runtime
            .block_on(self.service.list(&SlotFilter::scoped(&self.scope)))?;
        slots.sort_by(|a, b| {
            (a.day_of_week, a.start_time, a.id).cmp(&(b.day_of_week, b.start_time, b.id))
        });
        Ok(slots)
    }

    async fn find(&self, id: SlotId) -> Result<Option<ScheduleSlot>, ScheduleError> {
        self.store.find(id).await
    }

    fn show(&self) {
        match self.active_slots() {
            Ok(slots) => print!("{}", render_slots_as_text_table(&slots)),
            Err(e) => report_error(&e),
        }
    }
}

fn parse_day(s: &str) -> Option<DayOfWeek> {
    match s.parse() {
        Ok(day) => Some(day),
        Err(e) => {
            println!("{e}");
            None
        }
    }
}

fn parse_time(s: &str) -> Option<ClockTime> {
    match s.parse() {
        Ok(t) => Some(t),
        Err(e) => {
            println!("{e}");
            None
        }
    }
}

fn main() {
    telemetry::init_tracing();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(2);
        }
    };
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Could not start runtime: {e}");
            std::process::exit(1);
        }
    };
    let mut repl = Repl::new(runtime, config.scope());

    println!(
        "Timetable (CLI) - school '{}', year '{}' - type 'help' for commands\n",
        repl.scope.school_id, repl.scope.academic_year_id
    );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or("");

        match cmd {
            "help" => print_help(),
            "quit" | "exit" => break,
            "show" => repl.show(),
            "add" => {
                let args: Vec<&str> = parts.collect();
                if !(6..=7).contains(&args.len()) {
                    println!("Usage: add <class> <teacher> <subject> <day> <HH:MM> <HH:MM> [room]");
                    continue;
                }
                let Some(day_of_week) = parse_day(args[3]) else { continue };
                let Some(start_time) = parse_time(args[4]) else { continue };
                let Some(end_time) = parse_time(args[5]) else { continue };
                let draft = SlotDraft {
                    school_id: repl.scope.school_id.clone(),
                    academic_year_id: repl.scope.academic_year_id.clone(),
                    class_id: args[0].to_string(),
                    teacher_id: args[1].to_string(),
                    subject_id: args[2].to_string(),
                    classroom_id: args.get(6).map(|room| room.to_string()),
                    day_of_week,
                    start_time,
                    end_time,
                };
                match repl.runtime.block_on(repl.service.create_slot(draft)) {
                    Ok(slot) => {
                        println!("Slot {} created.", slot.id);
                        repl.show();
                    }
                    Err(e) => report_error(&e),
                }
            }
            "move" => {
                let args: Vec<&str> = parts.collect();
                if args.len() != 4 {
                    println!("Usage: move <id> <day> <HH:MM> <HH:MM>");
                    continue;
                }
                let id: SlotId = match args[0].parse() {
                    Ok(v) => v,
                    Err(_) => {
                        println!("Invalid id");
                        continue;
                    }
                };
                let Some(day_of_week) = parse_day(args[1]) else { continue };
                let Some(start_time) = parse_time(args[2]) else { continue };
                let Some(end_time) = parse_time(args[3]) else { continue };
                let existing = match repl.runtime.block_on(repl.find(id)) {
                    Ok(Some(slot)) if slot.active => slot,
                    Ok(_) => {
                        report_error(&ScheduleError::NotFound(id));
                        continue;
                    }
                    Err(e) => {
                        report_error(&e);
                        continue;
                    }
                };
                let mut draft = existing.draft();
                draft.day_of_week = day_of_week;
                draft.start_time = start_time;
                draft.end_time = end_time;
                match repl.runtime.block_on(repl.service.update_slot(id, draft)) {
                    Ok(slot) => {
                        println!("Slot {} moved.", slot.id);
                        repl.show();
                    }
                    Err(e) => report_error(&e),
                }
            }
            "delete" => {
                let id: SlotId = match parts.next().map(str::parse) {
                    Some(Ok(v)) => v,
                    _ => {
                        println!("Usage: delete <id>");
                        continue;
                    }
                };
                match repl.runtime.block_on(repl.service.remove_slot(id)) {
                    Ok(()) => println!("Deleted slot {id}."),
                    Err(e) => report_error(&e),
                }
            }
            "check" => {
                let args: Vec<&str> = parts.collect();
                if !(4..=6).contains(&args.len()) {
                    println!("Usage: check <teacher> <day> <HH:MM> <HH:MM> [room] [exclude_id]");
                    continue;
                }
                let Some(day_of_week) = parse_day(args[1]) else { continue };
                let Some(start_time) = parse_time(args[2]) else { continue };
                let Some(end_time) = parse_time(args[3]) else { continue };
                // "-" skips the room so an exclude id can still be given.
                let classroom_id = args
                    .get(4)
                    .filter(|room| **room != "-")
                    .map(|room| room.to_string());
                let exclude_slot_id = match args.get(5).map(|s| s.parse::<SlotId>()) {
                    Some(Ok(v)) => Some(v),
                    Some(Err(_)) => {
                        println!("Invalid exclude id");
                        continue;
                    }
                    None => None,
                };
                let query = ConflictQuery {
                    teacher_id: args[0].to_string(),
                    classroom_id,
                    day_of_week,
                    start_time,
                    end_time,
                    academic_year_id: repl.scope.academic_year_id.clone(),
                    exclude_slot_id,
                };
                match repl.runtime.block_on(repl.service.check_conflicts(&query)) {
                    Ok(conflicts) if conflicts.is_empty() => println!("No conflicts."),
                    Ok(conflicts) => {
                        println!("Conflicts with {} slot(s):", conflicts.len());
                        print!("{}", render_slots_as_text_table(&conflicts));
                    }
                    Err(e) => report_error(&e),
                }
            }
            "save" => {
                let fmt = parts.next();
                let path = parts.next();
                match (fmt, path) {
                    (Some(fmt), Some(path)) => {
                        let slots = repl.store.all_slots();
                        let res = match fmt {
                            "json" => save_slots_to_json(&slots, path),
                            "csv" => save_slots_to_csv(&slots, path),
                            _ => {
                                println!("Unknown format '{fmt}' (json|csv)");
                                continue;
                            }
                        };
                        match res {
                            Ok(()) => println!("Timetable saved to {path}"),
                            Err(e) => println!("Save error: {e}"),
                        }
                    }
                    _ => println!("Usage: save <json|csv> <path>"),
                }
            }
            "load" => {
                let fmt = parts.next();
                let path = parts.next();
                match (fmt, path) {
                    (Some(fmt), Some(path)) => {
                        let res = match fmt {
                            "json" => load_slots_from_json(path),
                            "csv" => load_slots_from_csv(path),
                            _ => {
                                println!("Unknown format '{fmt}' (json|csv)");
                                continue;
                            }
                        };
                        match res {
                            Ok(slots) => {
                                repl.replace_slots(slots);
                                println!("Timetable loaded from {path}");
                                repl.show();
                            }
                            Err(e) => println!("Load error: {e}"),
                        }
                    }
                    _ => println!("Usage: load <json|csv> <path>"),
                }
            }
            _ => println!("Unknown command. Type 'help'."),
        }
    }
}
