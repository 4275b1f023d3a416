use std::time::{Duration, Instant};

use crate::flow::{FlowSummary, FlowTable};

const ID_WIDTH: usize = 6;
const ADDR_WIDTH: usize = 24;
const STATE_WIDTH: usize = 28;

/// Debounced live table of the latest flows, redrawn in place with ANSI
/// cursor movement. Purely cosmetic; all real output goes to the sinks.
pub struct ConsoleDisplay {
    banner: String,
    debounce: Duration,
    last_print: Option<Instant>,
    last_lines: usize,
}

impl ConsoleDisplay {
    pub fn new(banner: String, debounce: Duration) -> Self {
        ConsoleDisplay {
            banner,
            debounce,
            last_print: None,
            last_lines: 0,
        }
    }

    /// Redraw if the debounce interval has passed.
    pub fn maybe_update(&mut self, table: &FlowTable, now: Instant) {
        let due = self
            .last_print
            .map_or(true, |last| now.duration_since(last) >= self.debounce);
        if !due {
            return;
        }

        self.print_table(&table.latest(10));
        self.last_print = Some(now);
    }

    fn print_table(&mut self, rows: &[FlowSummary]) {
        if self.last_lines > 0 {
            print!("\x1b[{}A", self.last_lines);
        }

        let width = ID_WIDTH + 2 * ADDR_WIDTH + STATE_WIDTH;
        println!("{}", self.banner);
        println!("Latest {} active flows:", rows.len());
        println!(
            "{:<ID_WIDTH$}{:<ADDR_WIDTH$}{:<ADDR_WIDTH$}{:<STATE_WIDTH$}",
            "ID", "SRC", "DST", "STATE"
        );
        println!("{}", "-".repeat(width));
        let mut lines = 4;

        for row in rows {
            println!(
                "{:<ID_WIDTH$}{:<ADDR_WIDTH$}{:<ADDR_WIDTH$}{:<STATE_WIDTH$}",
                row.id,
                row.key.src.to_string(),
                row.key.dst.to_string(),
                format!("{}/{}", row.client, row.server),
            );
            lines += 1;
        }

        // blank out leftovers from a previously taller table
        while lines < self.last_lines {
            println!("{}", " ".repeat(width));
            lines += 1;
        }

        self.last_lines = lines;
    }
}
