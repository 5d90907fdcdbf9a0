use std::cell::RefCell;
use std::env;
use std::error::Error;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{self, Event as CEvent, KeyCode};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use log::{info, warn, LevelFilter};
use tui::backend::CrosstermBackend;
use tui::layout::{Alignment, Constraint, Direction, Layout};
use tui::style::{Color, Modifier, Style};
use tui::text::{Span, Spans};
use tui::widgets::{Block, BorderType, Borders, Paragraph};
use tui::Terminal;

use charge_control::bsp::Board;
use charge_control::charger::Charger;
use charge_control::control::THRESHOLDS;
use charge_control::measurement::ADC_SCALE;
use charge_control::storage::CalibrationStore;

use crate::battery_model::{BatteryModel, PLANT_SPEEDUP};
use crate::file_eeprom::FileEeprom;
use crate::panel_logger::PanelLogger;
use crate::sim_board::{SimDelay, SimDisplay, SimPowerStage, SimSensors, SimWatchdog};

mod battery_model;
mod file_eeprom;
mod panel_logger;
mod sim_board;

const TICK_PERIOD: Duration = Duration::from_millis(100);
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_EEPROM_PATH: &str = "charger_eeprom.bin";
const INITIAL_STATE_OF_CHARGE: f32 = 0.2;
const LOG_LINES: usize = 12;

type Tui = Terminal<CrosstermBackend<Stdout>>;

/// Operator input, standing in for the rotary encoder menu
#[derive(Clone, Copy, Debug, PartialEq)]
enum Command {
    Start,
    Stop,
    CalibrateSystem,
    CalibrateVoltage,
    CalibrateCurrent,
    InjectOvercurrent,
    Quit,
}

impl Command {
    fn from_key(code: KeyCode) -> Option<Command> {
        match code {
            KeyCode::Char('s') => Some(Command::Start),
            KeyCode::Char('x') => Some(Command::Stop),
            KeyCode::Char('c') => Some(Command::CalibrateSystem),
            KeyCode::Char('v') => Some(Command::CalibrateVoltage),
            KeyCode::Char('i') => Some(Command::CalibrateCurrent),
            KeyCode::Char('o') => Some(Command::InjectOvercurrent),
            KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Everything that outlives a reboot of the charger
struct Sim<'a> {
    board: Board<'a>,
    plant: &'a RefCell<BatteryModel>,
    display: &'a SimDisplay,
    watchdog: &'a SimWatchdog,
    logger: &'static PanelLogger,
    eeprom_path: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = panel_logger::init(LevelFilter::Info)?;
    let eeprom_path = PathBuf::from(
        env::args()
            .nth(1)
            .unwrap_or_else(|| DEFAULT_EEPROM_PATH.to_string()),
    );

    let plant = RefCell::new(BatteryModel::new(INITIAL_STATE_OF_CHARGE));
    let sensors = SimSensors {
        plant: &plant,
        scale: ADC_SCALE,
    };
    let power_stage = SimPowerStage { plant: &plant };
    let delay = SimDelay { plant: &plant };
    let display = SimDisplay::new();
    let watchdog = SimWatchdog::new(WATCHDOG_TIMEOUT);

    let sim = Sim {
        board: Board {
            sensors: &sensors,
            power_stage: &power_stage,
            delay: &delay,
            feedback: &display,
            watchdog: &watchdog,
        },
        plant: &plant,
        display: &display,
        watchdog: &watchdog,
        logger,
        eeprom_path,
    };

    enable_raw_mode()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;

    let result = run(&sim, &mut terminal).await;

    disable_raw_mode()?;
    terminal.clear()?;
    terminal.show_cursor()?;
    result
}

/// One iteration of the outer loop per boot of the charger
async fn run(sim: &Sim<'_>, terminal: &mut Tui) -> Result<(), Box<dyn Error>> {
    let mut ticker = tokio::time::interval(TICK_PERIOD);
    loop {
        sim.watchdog.disarm();
        sim.display.reset();
        sim.plant.borrow_mut().clear_faults();

        let eeprom = FileEeprom::open(&sim.eeprom_path)?;
        let store = CalibrationStore::new(eeprom);
        let mut charger = Charger::new(sim.board, store, THRESHOLDS, ADC_SCALE);
        info!("boot, calibration {:?}", charger.load_source());

        while !sim.watchdog.expired() {
            ticker.tick().await;

            if let Some(command) = poll_command()? {
                if command == Command::Quit {
                    return Ok(());
                }
                execute(command, &mut charger, sim.plant);
            }

            // faults reach the operator through the display and the log
            let _ = charger.tick();
            sim.plant
                .borrow_mut()
                .advance(TICK_PERIOD.as_millis() as u32 * PLANT_SPEEDUP);

            draw_tui(terminal, sim, &charger)?;
        }
        warn!("watchdog reset");
    }
}

fn poll_command() -> io::Result<Option<Command>> {
    while event::poll(Duration::ZERO)? {
        if let CEvent::Key(key) = event::read()? {
            if let Some(command) = Command::from_key(key.code) {
                return Ok(Some(command));
            }
        }
    }
    Ok(None)
}

fn execute(command: Command, charger: &mut Charger<FileEeprom>, plant: &RefCell<BatteryModel>) {
    let outcome = match command {
        Command::Start => charger.start_charging().map_err(|fault| fault.to_string()),
        Command::Stop => charger.stop_charging().map_err(|fault| fault.to_string()),
        Command::CalibrateSystem => charger
            .calibrate_system()
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Command::CalibrateVoltage => charger
            .calibrate_voltage()
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Command::CalibrateCurrent => charger
            .calibrate_current()
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Command::InjectOvercurrent => {
            warn!("short circuit injected");
            plant.borrow_mut().inject_short_circuit();
            Ok(())
        }
        Command::Quit => Ok(()),
    };
    if let Err(reason) = outcome {
        info!("{:?} refused: {}", command, reason);
    }
}

fn draw_tui(terminal: &mut Tui, sim: &Sim, charger: &Charger<FileEeprom>) -> io::Result<()> {
    let plant = sim.plant.borrow();
    let state = charger.state();
    let factors = charger.factors();
    let thresholds = charger.thresholds();
    let log_lines = sim.logger.tail(LOG_LINES);

    terminal.draw(|rect| {
        let size = rect.size();
        let vertical_layout = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints(
                [
                    Constraint::Length(3),
                    Constraint::Length(6),
                    Constraint::Length(8),
                    Constraint::Min(3),
                    Constraint::Length(1),
                ]
                .as_ref(),
            )
            .split(size);

        let status_style = match sim.display.status() {
            "FAULT" => Style::default().fg(Color::White).bg(Color::Red),
            "charging" => Style::default().fg(Color::Black).bg(Color::Green),
            _ => Style::default(),
        };
        let readout = Paragraph::new(Spans::from(vec![
            Span::styled(
                format!(" {} ", sim.display.status()),
                status_style.add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::raw(sim.display.readout()),
        ]))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );

        let core = Paragraph::new(vec![
            Spans::from(format!("phase: {:?}", state.phase)),
            Spans::from(format!("duty cycle: {}", state.duty_cycle)),
            Spans::from(format!(
                "factors: voltage {:.4} current {:.4}",
                factors.voltage, factors.current
            )),
            Spans::from(format!(
                "limits: trip {:.2} A / {:.2} V  CC {:.2} A  CV {:.2} V",
                thresholds.max_safe_current,
                thresholds.max_battery_voltage,
                thresholds.target_charge_current,
                thresholds.max_charging_voltage
            )),
        ])
        .block(Block::default().title("charger").borders(Borders::ALL));

        let cell = Paragraph::new(vec![
            Spans::from(format!(
                "state of charge: {:.1} %",
                plant.state_of_charge * 100.0
            )),
            Spans::from(format!(
                "open circuit: {:.3} V  terminal: {:.3} V",
                plant.open_circuit_volts(),
                plant.terminal_volts()
            )),
            Spans::from(format!(
                "true current: {:.3} A  shunt: {:.3} A",
                plant.charge_current(),
                plant.shunt_current()
            )),
            Spans::from(format!(
                "duty {}  test load {}  short {}",
                plant.duty_cycle(),
                on_off(plant.load_enabled()),
                on_off(plant.short_circuit())
            )),
            Spans::from(format!(
                "adc gain {:.3}  shunt gain {:.3}",
                plant.adc_gain, plant.shunt_gain
            )),
        ])
        .block(Block::default().title("battery").borders(Borders::ALL));

        let mut messages: Vec<Spans> = sim
            .display
            .alerts()
            .into_iter()
            .map(|alert| Spans::from(Span::styled(alert, Style::default().fg(Color::Yellow))))
            .collect();
        messages.extend(log_lines.into_iter().map(Spans::from));
        let log = Paragraph::new(messages)
            .block(Block::default().title("alerts / log").borders(Borders::ALL));

        let help = Paragraph::new(Spans::from(
            "s start  x stop  c calibrate  v voltage  i current  o overcurrent  q quit",
        ))
        .alignment(Alignment::Center);

        rect.render_widget(readout, vertical_layout[0]);
        rect.render_widget(core, vertical_layout[1]);
        rect.render_widget(cell, vertical_layout[2]);
        rect.render_widget(log, vertical_layout[3]);
        rect.render_widget(help, vertical_layout[4]);
    })?;
    Ok(())
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
