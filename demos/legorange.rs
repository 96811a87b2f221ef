//! Terminal demo: a shared pixel board ("legorange") driven entirely through
//! the public [`webcom_sdk::Context`] API — subscribe to a board path,
//! render each brick as it arrives, and accept `x y color` lines on stdin as
//! puts back to the server.
//!
//! Grounded on `examples/legorange.c` (original_source): same VT100 brick
//! palette, same `-b`/`-l`/`-c` options, same "x y color" stdin protocol,
//! reimplemented against the engine's async `on_*`/`put` calls instead of a
//! hand-rolled libev callback graph.

use clap::Parser;
use serde_json::Value as Json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use webcom_sdk::{Context, ContextConfig};

#[derive(Parser, Debug)]
#[command(name = "legorange", about = "Shared pixel board demo over the datasync engine")]
struct Args {
    /// Board path. Must begin with '/'.
    #[arg(short = 'b', long = "board", default_value = "/brick")]
    board: String,
    /// Don't display bricks beyond this row.
    #[arg(short = 'l', long = "max-lines", default_value_t = 250)]
    max_lines: i64,
    /// Don't display bricks beyond this column.
    #[arg(short = 'c', long = "max-cols", default_value_t = 250)]
    max_cols: i64,
    /// Webcom host to connect to.
    #[arg(long, default_value = "io.datasync.orange.com")]
    host: String,
    /// Webcom port.
    #[arg(long, default_value_t = 443)]
    port: u16,
}

#[derive(Clone, Copy)]
enum Brick {
    None,
    White,
    Green,
    Red,
    Grey,
    Blue,
    Yellow,
    Brown,
    Other,
}

impl Brick {
    fn vt100(self) -> &'static str {
        match self {
            Brick::None => "  ",
            Brick::White => "\x1b[1;37m \u{25cf}\x1b[0m",
            Brick::Green => "\x1b[0;32m \u{25cf}\x1b[0m",
            Brick::Red => "\x1b[0;31m \u{25cf}\x1b[0m",
            Brick::Grey => "\x1b[1;30m \u{25cf}\x1b[0m",
            Brick::Blue => "\x1b[0;34m \u{25cf}\x1b[0m",
            Brick::Yellow => "\x1b[1;33m \u{25cf}\x1b[0m",
            Brick::Brown => "\x1b[2;31m \u{25cf}\x1b[0m",
            Brick::Other => "\x1b[0;37m \u{25cf}\x1b[0m",
        }
    }

    fn from_color_name(name: &str) -> Brick {
        match name {
            "white" => Brick::White,
            "green" => Brick::Green,
            "red" => Brick::Red,
            "darkgrey" => Brick::Grey,
            "blue" => Brick::Blue,
            "yellow" => Brick::Yellow,
            "brown" => Brick::Brown,
            _ => Brick::Other,
        }
    }
}

fn clear_screen() {
    print!("\x1b[2J");
}

fn move_to(x: i64, y: i64) {
    print!("\x1b[{};{}f", y + 1, 2 * x + 1);
}

fn draw_brick(x: i64, y: i64, brick: Brick) {
    move_to(x, y);
    print!("{}", brick.vt100());
}

fn draw_rgb_brick(x: i64, y: i64, r: u8, g: u8, b: u8) {
    let ccode = 16 + 36 * (r as u32 / 43) + 6 * (g as u32 / 43) + b as u32 / 43;
    move_to(x, y);
    print!("\x1b[38;5;{}m \u{25cf}\x1b[0m", ccode);
}

/// Parses a `"<col><row>"` brick key (spec §3: children of the board are
/// keyed by position, e.g. `"3-7"`) and renders it, mirroring
/// `on_brick_update` in the original.
fn on_brick_update(key: &str, data: &Json, max_lines: i64, max_cols: i64) {
    let Some((xs, ys)) = key.split_once('-') else {
        return;
    };
    let (Ok(x), Ok(y)) = (xs.parse::<i64>(), ys.parse::<i64>()) else {
        return;
    };
    if x >= max_cols / 2 || y >= max_lines || x < 0 || y < 0 {
        return;
    }

    if data.is_null() {
        draw_brick(x, y, Brick::None);
        return;
    }

    let Some(color) = data.get("color").and_then(Json::as_str) else {
        return;
    };
    if let Some(hex) = color.strip_prefix('#') {
        if hex.len() == 6 {
            let bytes = (0..3)
                .map(|i| u8::from_str_radix(&hex[2 * i..2 * i + 2], 16))
                .collect::<Result<Vec<_>, _>>();
            if let Ok(rgb) = bytes {
                draw_rgb_brick(x, y, rgb[0], rgb[1], rgb[2]);
                return;
            }
        }
    }
    draw_brick(x, y, Brick::from_color_name(color));
}

fn on_data_update(board: &str, path: &str, data: &Json, max_lines: i64, max_cols: i64) {
    if path == board {
        if data.is_null() {
            clear_screen();
        } else if let Some(obj) = data.as_object() {
            for (key, val) in obj {
                on_brick_update(key, val, max_lines, max_cols);
            }
        }
    } else if let Some(rest) = path.strip_prefix(board).and_then(|r| r.strip_prefix('/')) {
        on_brick_update(rest, data, max_lines, max_cols);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if !args.board.starts_with('/') {
        eprintln!("the board name must begin with '/'");
        std::process::exit(1);
    }

    let ctx = Context::new(ContextConfig::new(&args.host, args.port, "legorange"));

    clear_screen();

    let board = args.board.clone();
    let max_lines = args.max_lines;
    let max_cols = args.max_cols;
    ctx.on_value(&args.board, move |data| {
        on_data_update(&board, &board, &data, max_lines, max_cols);
    })
    .await?;

    let board = args.board.clone();
    ctx.on_child_added(&args.board, move |data, _prev| {
        let child_path = format!("{}/<child>", board);
        on_data_update(&board, &child_path, &data, args.max_lines, args.max_cols);
    })
    .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(_) => break,
        };

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() == 3 {
            if let (Ok(x), Ok(y), Ok(col)) = (
                parts[0].parse::<i64>(),
                parts[1].parse::<i64>(),
                parts[2].parse::<i64>(),
            ) {
                let color = if col != 0 { "white" } else { "black" };
                let path = format!("{}/{}-{}", args.board, x, y);
                let data = serde_json::json!({
                    "color": color,
                    "uid": "anonymous",
                    "x": x,
                    "y": y,
                });
                match ctx.put(&path, data).await {
                    Ok(()) => println!("OK"),
                    Err(_) => println!("ERROR"),
                }
            }
        }
    }

    clear_screen();
    move_to(0, 0);
    println!("Closing...");
    ctx.close().await?;
    Ok(())
}
