//! Line transport against the motion thread.

use std::io::Cursor;

use xyscrew_motion::transport::{SessionEnd, serve_session};

use super::common::sim_table;

#[test]
fn scripted_session() {
    let table = sim_table();
    let script = "\
; bring-up
PING
G28
SET WORK X30 Y40
WORK
m114
bogus
QUIT
";
    let mut out = Vec::new();
    let end = serve_session(&table.client, Cursor::new(script), &mut out, None).unwrap();

    assert_eq!(end, SessionEnd::Quit);
    let lines: Vec<_> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(
        lines,
        [
            "PONG",
            "ok IN_HOME_POS",
            "ok",
            "ok IN_WORK_POS",
            "X:30.000 Y:40.000 HX:1 HY:1 EN:1 ESTOP:0",
            "err UNKNOWN",
            "ok BYE",
        ]
    );
}

#[test]
fn sessions_from_two_clients_are_serialized() {
    let table = sim_table();
    table.send("G28");

    let workers: Vec<_> = (0..2)
        .map(|n| {
            let client = table.client.clone();
            std::thread::spawn(move || {
                for i in 0..10 {
                    let target = 10.0 * (n * 10 + i) as f64 / 2.0;
                    assert_eq!(client.send(&format!("G X{target}")).unwrap().to_string(), "ok");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // Position matches the controller's view: no interleaved pulse trains.
    let status = table.send("M114");
    let x_mm: f64 = status
        .strip_prefix("X:")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap()
        .parse()
        .unwrap();
    assert!((table.x.position_mm() - x_mm).abs() < 1e-9);
}
