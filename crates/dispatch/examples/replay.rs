//! Example: Replay a scripted input session through the dispatcher.
//!
//! Run with: cargo run -p switchyard-dispatch --example replay [config.json]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use switchyard_dispatch::{DispatchConfig, Dispatcher};
use switchyard_events::{
    Event, FocusEvent, InvocationTag, KeyCode, KeyEvent, MouseEvent, SourceId, WindowEvent,
    WindowPhase,
};
use switchyard_lock::ProcessIntentLock;
use switchyard_queue::InMemoryToolkit;
use tracing_subscriber::EnvFilter;

const EDITOR: SourceId = SourceId::new(1);
const SIDEBAR: SourceId = SourceId::new(2);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,switchyard=debug")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => DispatchConfig::from_json_file(path)?,
        None => DispatchConfig::default(),
    };

    println!("=== Dispatch Replay ===");

    let toolkit = Arc::new(InMemoryToolkit::with_handler(|event| {
        println!(
            "[{}] {:>6} {:<14} from {}{}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            event.id().to_string(),
            event.kind().name(),
            event.source(),
            if event.is_consumed() { " (consumed)" } else { "" }
        );
        Ok(())
    }));
    let dispatcher = Dispatcher::builder(toolkit)
        .config(config)
        .intent_lock(Arc::new(ProcessIntentLock::new()))
        .build();

    dispatcher.register_idle_listener(
        || println!("-- idle for 300ms --"),
        Duration::from_millis(300),
    )?;
    dispatcher.add_pre_dispatch_interceptor(
        |event: &mut Event| event.as_key().is_some_and(|k| k.code == KeyCode::ESCAPE),
        None,
    );

    let producer = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || -> anyhow::Result<()> {
            dispatcher.post_event(Event::window(
                EDITOR,
                WindowEvent::new(WindowPhase::Activated),
            ))?;
            dispatcher.post_event(Event::focus(EDITOR, FocusEvent::gained(Some(SIDEBAR))))?;
            dispatcher.defer_until_focus_settles(|| println!("-- focus settled --"));

            for c in "hi".chars() {
                let code = KeyCode::letter(c).unwrap_or(KeyCode::UNDEFINED);
                dispatcher.post_event(Event::key(EDITOR, KeyEvent::pressed(code, Some(c))))?;
                dispatcher.post_event(Event::key(EDITOR, KeyEvent::typed(c)))?;
                dispatcher.post_event(Event::key(EDITOR, KeyEvent::released(code, Some(c))))?;
            }
            dispatcher.post_event(Event::key(
                EDITOR,
                KeyEvent::pressed(KeyCode::ESCAPE, None),
            ))?;
            dispatcher.do_when_ready(|| println!("-- keyboard ready --"));

            dispatcher.post_event(Event::mouse(SIDEBAR, MouseEvent::pressed(1, 10, 10)))?;
            dispatcher.post_event(Event::mouse(SIDEBAR, MouseEvent::released(1, 10, 10)))?;
            dispatcher.post_event(Event::mouse(
                SIDEBAR,
                MouseEvent::clicked(1, 10, 10, 1),
            ))?;
            dispatcher.post_event(Event::invocation(
                SourceId::DISPATCHER,
                InvocationTag::REPAINT,
                || println!("-- repaint --"),
            ))?;

            thread::sleep(Duration::from_millis(700));
            dispatcher.shutdown();
            Ok(())
        })
    };

    dispatcher.run_forever()?;
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;

    let (posted, dispatched) = dispatcher.key_event_counts();
    println!(
        "\nDone: {} events, {} of {} key events dispatched.",
        dispatcher.event_count(),
        dispatched,
        posted
    );
    Ok(())
}
