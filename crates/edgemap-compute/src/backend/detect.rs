//! Backend probing for `Backend::Auto` and `edgemap backends`.
//!
//! The CPU executor is always present. The CUDA backend is listed only when
//! compiled in, and counts as available only if a context opens on device 0.

use super::Backend;

const CPU_PRIORITY: u32 = 10;
const CUDA_PRIORITY: u32 = 150;

/// One row of the backend table.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub backend: Backend,
    /// Label in the `[+] NAME: ...` listing.
    pub name: &'static str,
    /// A pipeline can be created on it right now.
    pub available: bool,
    /// Auto-selection rank; unavailable backends rank 0.
    pub priority: u32,
    pub description: &'static str,
}

/// Compiled-in backends, highest priority first.
pub fn detect_backends() -> Vec<BackendInfo> {
    #[allow(unused_mut)]
    let mut backends = vec![BackendInfo {
        backend: Backend::Cpu,
        name: "CPU",
        available: true,
        priority: CPU_PRIORITY,
        description: "tiled stage executor on rayon worker threads",
    }];

    #[cfg(feature = "cuda")]
    {
        let available = super::CudaPrimitives::is_available();
        backends.push(BackendInfo {
            backend: Backend::Cuda,
            name: "CUDA",
            available,
            priority: if available { CUDA_PRIORITY } else { 0 },
            description: "NVRTC kernels with shared-memory tiles on an NVIDIA GPU",
        });
    }

    backends.sort_by(|a, b| b.priority.cmp(&a.priority));
    backends
}

/// Backend that `Backend::Auto` resolves to; the CPU if nothing else opens.
pub fn select_best_backend() -> Backend {
    detect_backends()
        .into_iter()
        .filter(|b| b.available)
        .max_by_key(|b| b.priority)
        .map(|b| b.backend)
        .unwrap_or(Backend::Cpu)
}

/// One `[+] NAME: description` line per backend, `[-]` when unavailable.
pub fn describe_backends() -> String {
    detect_backends()
        .iter()
        .map(|info| {
            let status = if info.available { "+" } else { "-" };
            format!("[{status}] {}: {}\n", info.name, info.description)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_listed_and_available() {
        let backends = detect_backends();
        let cpu = backends.iter().find(|b| b.backend == Backend::Cpu).unwrap();
        assert!(cpu.available);
        assert_eq!(cpu.priority, CPU_PRIORITY);
        assert!(describe_backends().contains("[+] CPU: tiled stage executor"));
    }

    #[test]
    fn test_sorted_by_priority() {
        let backends = detect_backends();
        assert!(backends.windows(2).all(|w| w[0].priority >= w[1].priority));
    }

    #[test]
    fn test_best_is_concrete() {
        assert_ne!(select_best_backend(), Backend::Auto);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cpu_only_build() {
        assert_eq!(detect_backends().len(), 1);
        assert_eq!(select_best_backend(), Backend::Cpu);
    }
}
