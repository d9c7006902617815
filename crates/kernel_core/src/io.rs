use std::collections::{BTreeSet, VecDeque};

use log::info;
use sim_common::Pid;

/// Runtime-assigned id of one I/O connection.
pub type InstanceId = u64;

/// A pending use of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRequest {
    pub pid: Pid,
    pub duration_ms: u32,
}

/// One connected instance of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoInstance {
    pub id: InstanceId,
    pub serving: Option<Pid>,
}

/// A named device with its instances and waiting requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoDevice {
    pub name: String,
    pub queue: VecDeque<IoRequest>,
    pub in_flight: BTreeSet<Pid>,
    pub instances: Vec<IoInstance>,
}

impl IoDevice {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queue: VecDeque::new(),
            in_flight: BTreeSet::new(),
            instances: Vec::new(),
        }
    }

    fn start(&mut self, position: usize, request: IoRequest) -> InstanceId {
        let instance = &mut self.instances[position];
        instance.serving = Some(request.pid);
        self.in_flight.insert(request.pid);
        instance.id
    }
}

/// Where a submitted request went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Started(InstanceId),
    Queued,
}

/// Outcome of an instance reporting completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub served: Pid,
    /// Queued request now handed to the same instance.
    pub next: Option<IoRequest>,
}

/// Outcome of an instance disconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnection {
    pub device: String,
    pub interrupted: Option<Pid>,
    /// Requests that can no longer be served because the device is gone.
    pub abandoned: Vec<Pid>,
    pub device_removed: bool,
}

/// Devices keyed by case-insensitive name.
#[derive(Debug, Default)]
pub struct IoRegistry {
    devices: Vec<IoDevice>,
}

impl IoRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.devices
            .iter()
            .position(|device| device.name.eq_ignore_ascii_case(name))
    }

    fn locate(&self, instance: InstanceId) -> Option<(usize, usize)> {
        self.devices.iter().enumerate().find_map(|(d, device)| {
            device
                .instances
                .iter()
                .position(|candidate| candidate.id == instance)
                .map(|i| (d, i))
        })
    }

    /// Returns the device called `name`, ignoring case.
    pub fn device(&self, name: &str) -> Option<&IoDevice> {
        self.position(name).map(|d| &self.devices[d])
    }

    /// Returns true if a device called `name` is connected.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Adds an instance of `name`, creating the device on first sight. A
    /// queued request is handed to the new instance right away.
    pub fn register(&mut self, name: &str, instance: InstanceId) -> Option<IoRequest> {
        let d = match self.position(name) {
            Some(d) => d,
            None => {
                info!("Registering I/O device {}", name);
                self.devices.push(IoDevice::new(name));
                self.devices.len() - 1
            }
        };
        let device = &mut self.devices[d];
        device.instances.push(IoInstance {
            id: instance,
            serving: None,
        });
        info!(
            "I/O device {}: instance {} registered ({} total)",
            device.name,
            instance,
            device.instances.len()
        );
        let request = device.queue.pop_front()?;
        let last = device.instances.len() - 1;
        device.start(last, request);
        Some(request)
    }

    /// Sends a request to a free instance of `name` or queues it. Returns
    /// `None` if the device does not exist.
    pub fn submit(&mut self, name: &str, request: IoRequest) -> Option<Submission> {
        let d = self.position(name)?;
        let device = &mut self.devices[d];
        let free = device
            .instances
            .iter()
            .position(|instance| instance.serving.is_none());
        match free {
            Some(i) => Some(Submission::Started(device.start(i, request))),
            None => {
                device.queue.push_back(request);
                Some(Submission::Queued)
            }
        }
    }

    /// Frees `instance` after it finished and hands it the next queued
    /// request. Returns `None` if the instance is unknown or idle.
    pub fn complete(&mut self, instance: InstanceId) -> Option<Completion> {
        let (d, i) = self.locate(instance)?;
        let device = &mut self.devices[d];
        let served = device.instances[i].serving.take()?;
        device.in_flight.remove(&served);
        let next = device.queue.pop_front();
        if let Some(request) = next {
            device.start(i, request);
        }
        Some(Completion { served, next })
    }

    /// Removes `instance`. When it was the device's last instance the whole
    /// device goes away and its queue is abandoned.
    pub fn disconnect(&mut self, instance: InstanceId) -> Option<Disconnection> {
        let (d, i) = self.locate(instance)?;
        let device = &mut self.devices[d];
        let removed = device.instances.remove(i);
        let interrupted = removed.serving;
        if let Some(pid) = interrupted {
            device.in_flight.remove(&pid);
        }
        let name = device.name.clone();
        if !device.instances.is_empty() {
            return Some(Disconnection {
                device: name,
                interrupted,
                abandoned: Vec::new(),
                device_removed: false,
            });
        }
        let device = self.devices.remove(d);
        info!("I/O device {} removed", device.name);
        Some(Disconnection {
            device: name,
            interrupted,
            abandoned: device.queue.iter().map(|request| request.pid).collect(),
            device_removed: true,
        })
    }

    /// Returns the number of connected devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if no device is connected.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pid: Pid, duration_ms: u32) -> IoRequest {
        IoRequest { pid, duration_ms }
    }

    #[test]
    fn names_match_ignoring_case() {
        let mut io = IoRegistry::new();
        io.register("DISCO", 1);
        assert!(io.contains("disco"));
        io.register("Disco", 2);
        assert_eq!(io.len(), 1);
        assert_eq!(io.device("DISCO").expect("device").instances.len(), 2);
    }

    #[test]
    fn busy_device_queues_until_completion() {
        let mut io = IoRegistry::new();
        io.register("DISCO", 1);
        assert_eq!(io.submit("DISCO", request(9, 100)), Some(Submission::Started(1)));
        assert_eq!(io.submit("DISCO", request(10, 500)), Some(Submission::Queued));
        assert_eq!(io.submit("TECLADO", request(11, 5)), None);

        let completion = io.complete(1).expect("instance should be busy");
        assert_eq!(completion.served, 9);
        assert_eq!(completion.next, Some(request(10, 500)));
        let device = io.device("DISCO").expect("device");
        assert_eq!(device.in_flight, BTreeSet::from([10]));
        assert!(device.queue.is_empty());
    }

    #[test]
    fn new_instance_takes_queued_request() {
        let mut io = IoRegistry::new();
        io.register("DISCO", 1);
        io.submit("DISCO", request(1, 10));
        io.submit("DISCO", request(2, 20));
        assert_eq!(io.register("DISCO", 2), Some(request(2, 20)));
        assert_eq!(io.device("DISCO").expect("device").instances[1].serving, Some(2));
    }

    #[test]
    fn last_instance_disconnect_removes_device() {
        let mut io = IoRegistry::new();
        io.register("DISCO", 1);
        io.submit("DISCO", request(9, 100));
        io.submit("DISCO", request(11, 100));

        let gone = io.disconnect(1).expect("instance should exist");
        assert_eq!(gone.interrupted, Some(9));
        assert_eq!(gone.abandoned, vec![11]);
        assert!(gone.device_removed);
        assert!(!io.contains("DISCO"));
    }

    #[test]
    fn disconnect_keeps_device_with_other_instances() {
        let mut io = IoRegistry::new();
        io.register("DISCO", 1);
        io.register("DISCO", 2);
        io.submit("DISCO", request(4, 100));
        io.submit("DISCO", request(5, 100));
        io.submit("DISCO", request(6, 100));

        let gone = io.disconnect(1).expect("instance should exist");
        assert_eq!(gone.interrupted, Some(4));
        assert!(gone.abandoned.is_empty());
        assert!(!gone.device_removed);
        assert_eq!(io.device("DISCO").expect("device").queue.len(), 1);
    }
}
