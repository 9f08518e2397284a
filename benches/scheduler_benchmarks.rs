use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use midiarp_scheduler::messaging::{create_command_channel, create_notification_channel};
use midiarp_scheduler::worker::WorkerRegistry;
use midiarp_scheduler::{
    Arpeggiator, ClockConverter, GrooveSettings, Lfo, MidiMessage, OutputBinding, RealTime,
    Scheduler, SchedulerConfig, StepSequencer, Tempo, VirtualQueue, Worker,
};

/// Tick <-> real time conversion, done for every scheduled message
fn bench_clock_conversion(c: &mut Criterion) {
    let mut clock = ClockConverter::new(Tempo::new(127.0).nanos_per_tick());
    clock.resync(10_000, RealTime::from_millis(2_500));

    c.bench_function("clock_real_time_of", |b| {
        b.iter(|| {
            for tick in 10_000..10_512 {
                black_box(clock.real_time_of(black_box(tick)));
            }
        });
    });

    c.bench_function("clock_ticks_since_epoch", |b| {
        b.iter(|| {
            for ms in 2_500..3_012u64 {
                black_box(clock.ticks_since_epoch(RealTime::from_millis(black_box(ms))));
            }
        });
    });
}

fn workers(count: usize) -> Vec<Box<dyn Worker>> {
    (0..count)
        .map(|i| -> Box<dyn Worker> {
            let binding = OutputBinding::new(0, (i % 16) as u8);
            match i % 3 {
                0 => Box::new(Lfo::new(binding, 74)),
                1 => Box::new(StepSequencer::with_notes(binding, &[60, 63, 67, 70])),
                _ => {
                    let mut arp = Arpeggiator::new(binding);
                    for note in [60, 64, 67] {
                        arp.handle_input(
                            &MidiMessage::NoteOn {
                                channel: (i % 16) as u8,
                                note,
                                velocity: 100,
                            },
                            0,
                        );
                    }
                    Box::new(arp)
                }
            }
        })
        .collect()
}

/// One due cycle: pull every due worker and groove the output
fn bench_registry_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_dispatch");
    let groove = GrooveSettings::new(20, 10, 2);

    for count in [1, 8, 32] {
        let mut registry = WorkerRegistry::new(0);
        for worker in workers(count) {
            registry.register(worker);
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let Some(tick) = registry.earliest_due() else {
                    return;
                };
                for id in registry.due_at(tick) {
                    for event in registry.pull(id) {
                        black_box(groove.apply(event).messages());
                    }
                }
            });
        });
    }
    group.finish();
}

/// Full loop iterations against the virtual queue
fn bench_scheduler_steps(c: &mut Criterion) {
    c.bench_function("scheduler_100_steps", |b| {
        let (queue, handle) = VirtualQueue::new();
        let (_commands, command_rx) = create_command_channel(64);
        let (notification_tx, _notifications) = create_notification_channel(64);
        let mut scheduler =
            match Scheduler::new(queue, SchedulerConfig::default(), command_rx, notification_tx) {
                Ok(scheduler) => scheduler,
                Err(e) => panic!("scheduler setup failed: {}", e),
            };
        for worker in workers(8) {
            scheduler.add_worker(worker);
        }
        if let Err(e) = scheduler.start_queue() {
            panic!("queue start failed: {}", e);
        }

        b.iter(|| {
            for _ in 0..100 {
                scheduler.step();
            }
            black_box(handle.take_sent().len());
        });
    });
}

criterion_group!(
    benches,
    bench_clock_conversion,
    bench_registry_dispatch,
    bench_scheduler_steps
);
criterion_main!(benches);
