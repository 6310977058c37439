//! Condition poller: fixed-cadence change detection.
//!
//! Each tick walks every event's conditions in registration order. A
//! condition that reports a change is dispatched at once, before the next
//! condition runs. Condition and handler failures are logged and the tick
//! carries on; nothing a condition or handler does stops the loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use super::dispatcher::Dispatcher;
use super::{BoxError, lock, panic_message};
use crate::content::EventArgs;

/// A zero-argument change probe.
///
/// `Ok(None)` or an empty argument list means "no change".
pub type Condition = Arc<dyn Fn() -> Result<Option<EventArgs>, BoxError> + Send + Sync>;

#[derive(Default)]
pub struct Poller {
    /// Event names in first-registration order, each with its conditions.
    conditions: Mutex<Vec<(String, Vec<Condition>)>>,
}

impl Poller {
    /// Append a condition for `event`.
    pub fn add_condition<F>(&self, event: &str, condition: F)
    where
        F: Fn() -> Result<Option<EventArgs>, BoxError> + Send + Sync + 'static,
    {
        let mut table = lock(&self.conditions);
        let condition: Condition = Arc::new(condition);
        match table.iter_mut().find(|(name, _)| name == event) {
            Some((_, list)) => list.push(condition),
            None => table.push((event.to_string(), vec![condition])),
        }
    }

    /// Run one full pass over all conditions.
    ///
    /// Returns the number of events dispatched (successfully or not).
    pub fn tick(&self, dispatcher: &Dispatcher) -> usize {
        let snapshot: Vec<(String, Vec<Condition>)> = lock(&self.conditions).clone();
        let mut fired = 0;

        for (event, conditions) in &snapshot {
            for condition in conditions {
                let args = match catch_unwind(AssertUnwindSafe(|| condition())) {
                    Ok(Ok(Some(args))) if !args.is_empty() => args,
                    Ok(Ok(_)) => continue,
                    Ok(Err(e)) => {
                        tracing::warn!(event = %event, error = %e, "condition failed");
                        continue;
                    }
                    Err(panic) => {
                        tracing::warn!(
                            event = %event,
                            panic = %panic_message(&*panic),
                            "condition panicked"
                        );
                        continue;
                    }
                };

                fired += 1;
                tracing::trace!(event = %event, args = args.len(), "condition fired");
                match catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(event, &args))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "handler failed"),
                    Err(panic) => tracing::warn!(
                        event = %event,
                        panic = %panic_message(&*panic),
                        "handler panicked"
                    ),
                }
            }
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Arg;

    fn recording_dispatcher(event: &str) -> (Dispatcher, Arc<Mutex<Vec<Vec<Arg>>>>) {
        let d = Dispatcher::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        d.on(event, move |args: &[Arg]| {
            sink.lock().unwrap().push(args.to_vec());
            Ok(())
        });
        (d, seen)
    }

    #[test]
    fn one_tick_dispatches_only_changed_conditions() {
        let (d, seen) = recording_dispatcher("e");
        let p = Poller::default();
        p.add_condition("e", || Ok(Some(vec![Arg::from("text"), Arg::from("a")])));
        p.add_condition("e", || Ok(None));

        assert_eq!(p.tick(&d), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![Arg::from("text"), Arg::from("a")]]
        );
    }

    #[test]
    fn empty_args_are_no_change() {
        let (d, seen) = recording_dispatcher("e");
        let p = Poller::default();
        p.add_condition("e", || Ok(Some(Vec::new())));
        assert_eq!(p.tick(&d), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn multiple_conditions_fire_in_order_within_tick() {
        let (d, seen) = recording_dispatcher("e");
        let p = Poller::default();
        p.add_condition("e", || Ok(Some(vec![Arg::from("1")])));
        p.add_condition("e", || Ok(Some(vec![Arg::from("2")])));

        assert_eq!(p.tick(&d), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![Arg::from("1")], vec![Arg::from("2")]]
        );
    }

    #[test]
    fn events_are_walked_in_first_registration_order() {
        let d = Dispatcher::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["b", "a"] {
            let order = Arc::clone(&order);
            d.on(name, move |_: &[Arg]| {
                order.lock().unwrap().push(name);
                Ok(())
            });
        }
        let p = Poller::default();
        p.add_condition("b", || Ok(Some(vec![Arg::from("x")])));
        p.add_condition("a", || Ok(Some(vec![Arg::from("x")])));
        p.add_condition("b", || Ok(Some(vec![Arg::from("y")])));

        p.tick(&d);
        assert_eq!(*order.lock().unwrap(), vec!["b", "b", "a"]);
    }

    #[test]
    fn failing_condition_does_not_stop_the_tick() {
        let (d, seen) = recording_dispatcher("e");
        let p = Poller::default();
        p.add_condition("e", || Err("probe failed".into()));
        p.add_condition("e", || panic!("probe exploded"));
        p.add_condition("e", || Ok(Some(vec![Arg::from("ok")])));

        assert_eq!(p.tick(&d), 1);
        assert_eq!(*seen.lock().unwrap(), vec![vec![Arg::from("ok")]]);
    }

    #[test]
    fn failing_handler_does_not_stop_the_tick() {
        let d = Dispatcher::default();
        d.on("bad", |_: &[Arg]| Err("handler failed".into()));
        d.on("panics", |_: &[Arg]| panic!("handler exploded"));
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        d.on("good", move |_: &[Arg]| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });

        let p = Poller::default();
        for name in ["bad", "panics", "good"] {
            p.add_condition(name, || Ok(Some(vec![Arg::from("x")])));
        }

        assert_eq!(p.tick(&d), 3);
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
