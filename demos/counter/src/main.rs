use std::thread;

use repose_state::*;

#[derive(Clone, PartialEq)]
struct Ticker(&'static str);

impl Disposable for Ticker {
    fn dispose(&self) {
        log::info!("ticker '{}' released", self.0);
    }
}

fn compose(store: &KeyedStore, show_ticker: bool) -> anyhow::Result<()> {
    store.begin_pass();

    let count = store.remember_with_key("count", || 0i32)?;
    if show_ticker {
        let ticker = store.remember_disposable("ticker", || Ticker("clock"))?;
        log::info!("composing with ticker '{}'", ticker.get().0);
    }
    log::info!("composing, count = {}", count.get());

    let reclaimed = store.end_pass();
    if reclaimed > 0 {
        log::info!("reclaimed {reclaimed} slot(s)");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let store = KeyedStore::new();
    compose(&store, true)?;

    let count = store.remember_with_key("count", || 0i32)?;

    // a diamond: both arms read `count`, `label` reads both arms
    let doubled = derived_state({
        let count = count.clone();
        move || count.get() * 2
    });
    let parity = derived_state({
        let count = count.clone();
        move || if count.get() % 2 == 0 { "even" } else { "odd" }
    });
    let label = derived_state({
        let (doubled, parity) = (doubled.clone(), parity.clone());
        move || format!("{} ({})", doubled.get(), parity.get())
    });

    let _printer = effect({
        let label = label.clone();
        move || println!("label: {}", label.get())
    });

    count.set(1);
    count.set(1); // equivalent, nothing happens
    count.update(|c| *c += 1);

    thread::scope(|s| {
        for step in [10, 20, 30] {
            let count = count.clone();
            s.spawn(move || count.set(step));
        }
    });

    compose(&store, false)?;
    println!("final: {}", label.get());
    Ok(())
}
