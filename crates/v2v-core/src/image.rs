use std::{
    cell::Cell,
    path::{Path, PathBuf},
};

use once_cell::unsync::OnceCell;

use crate::{DiskFormat, GuestFs, GuestInfo, GuestLauncher, V2vError};

/// A guest disk image.
///
/// The guest session is launched lazily on first use and then kept for the
/// lifetime of the image. Inspection runs at most once; its result is cached
/// and treated as immutable afterwards.
pub struct GuestImage<Launcher>
where
    Launcher: GuestLauncher,
{
    path: PathBuf,
    readonly: bool,
    disk_format: DiskFormat,
    launcher: Launcher,

    /// The guest session, once launched.
    session: OnceCell<Launcher::Fs>,

    /// Cached inspection result.
    info: OnceCell<GuestInfo>,

    /// Whether the filesystems of the image have been mounted.
    mounted: Cell<bool>,
}

impl<Launcher> GuestImage<Launcher>
where
    Launcher: GuestLauncher,
{
    /// Creates a new guest image.
    ///
    /// No session is established until one of the accessors needs it.
    pub fn new(launcher: Launcher, path: impl AsRef<Path>, readonly: bool) -> Self {
        let path = path.as_ref().to_path_buf();

        Self {
            disk_format: DiskFormat::from_path(&path),
            path,
            readonly,
            launcher,
            session: OnceCell::new(),
            info: OnceCell::new(),
            mounted: Cell::new(false),
        }
    }

    /// Returns the path of the image.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the image is opened read-only.
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Returns the container format inferred from the file name.
    pub fn disk_format(&self) -> DiskFormat {
        self.disk_format
    }

    /// Returns the guest session, launching it if necessary.
    pub fn session(&self) -> Result<&Launcher::Fs, V2vError> {
        self.session.get_or_try_init(|| {
            tracing::debug!(
                path = %self.path.display(),
                readonly = self.readonly,
                "Launching guest session"
            );
            self.launcher.launch(&self.path, self.readonly)
        })
    }

    /// Returns the inspection result, inspecting the image if necessary.
    pub fn info(&self) -> Result<&GuestInfo, V2vError> {
        self.info.get_or_try_init(|| {
            let info = self.session()?.inspect()?;
            tracing::debug!(?info, "Volume info");
            Ok(info)
        })
    }

    /// Returns the guest session with every filesystem of the image mounted.
    ///
    /// Mount points are mounted shortest first, so that `/` precedes
    /// `/boot`. Mount points that are already mounted are skipped. A mount
    /// that fails is logged and ignored.
    pub fn mounted(&self) -> Result<&Launcher::Fs, V2vError> {
        let fs = self.session()?;
        let info = self.info()?;

        if self.mounted.get() {
            return Ok(fs);
        }

        let current = fs.mounts()?;

        let mut mountpoints = info.mountpoints.iter().collect::<Vec<_>>();
        mountpoints.sort_by_key(|(mountpoint, _)| mountpoint.len());

        for (mountpoint, device) in mountpoints {
            if current.contains(mountpoint) {
                continue;
            }

            tracing::debug!(%device, %mountpoint, "Mounting device");

            if let Err(err) = fs.mount(mountpoint, device, self.readonly) {
                tracing::warn!(%err, %device, %mountpoint, "Mount failed (ignored)");
            }
        }

        tracing::debug!(mounts = ?fs.mounts()?, "Current mounts");
        self.mounted.set(true);

        Ok(fs)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

    use super::*;
    use crate::OsType;

    #[derive(Default)]
    struct Calls {
        launches: usize,
        inspections: usize,
        mounts: Vec<(String, bool)>,
    }

    struct MockFs {
        calls: Rc<RefCell<Calls>>,
        premounted: Vec<String>,
    }

    impl GuestFs for MockFs {
        fn inspect(&self) -> Result<GuestInfo, V2vError> {
            self.calls.borrow_mut().inspections += 1;

            Ok(GuestInfo {
                os_type: OsType::Linux,
                distro: "debian".into(),
                arch: "x86_64".into(),
                major: 12,
                minor: 0,
                hostname: "host".into(),
                product: String::new(),
                filesystems: vec!["/dev/sda1".into(), "/dev/sda2".into()],
                mountpoints: BTreeMap::from([
                    ("/boot".into(), "/dev/sda1".into()),
                    ("/".into(), "/dev/sda2".into()),
                    ("/var".into(), "/dev/sda3".into()),
                ]),
            })
        }

        fn mounts(&self) -> Result<Vec<String>, V2vError> {
            let mut mounts = self.premounted.clone();
            mounts.extend(self.calls.borrow().mounts.iter().map(|(mp, _)| mp.clone()));
            Ok(mounts)
        }

        fn mount(&self, mountpoint: &str, _device: &str, readonly: bool) -> Result<(), V2vError> {
            if mountpoint == "/boot" {
                return Err(V2vError::Other("device busy"));
            }

            self.calls
                .borrow_mut()
                .mounts
                .push((mountpoint.to_owned(), readonly));
            Ok(())
        }

        fn download(&self, _remote: &str, _local: &Path) -> Result<(), V2vError> {
            unimplemented!()
        }

        fn upload(&self, _local: &Path, _remote: &str) -> Result<(), V2vError> {
            unimplemented!()
        }

        fn mkdir_all(&self, _path: &str) -> Result<(), V2vError> {
            unimplemented!()
        }

        fn is_dir(&self, _path: &str) -> Result<bool, V2vError> {
            unimplemented!()
        }

        fn case_sensitive_path(&self, path: &str) -> Result<String, V2vError> {
            Ok(path.to_owned())
        }
    }

    struct MockLauncher {
        calls: Rc<RefCell<Calls>>,
        premounted: Vec<String>,
    }

    impl GuestLauncher for MockLauncher {
        type Fs = MockFs;

        fn launch(&self, _image: &Path, _readonly: bool) -> Result<MockFs, V2vError> {
            self.calls.borrow_mut().launches += 1;
            Ok(MockFs {
                calls: self.calls.clone(),
                premounted: self.premounted.clone(),
            })
        }
    }

    fn image(readonly: bool, premounted: &[&str]) -> (GuestImage<MockLauncher>, Rc<RefCell<Calls>>) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let launcher = MockLauncher {
            calls: calls.clone(),
            premounted: premounted.iter().map(|mp| mp.to_string()).collect(),
        };

        (GuestImage::new(launcher, "/images/guest.vmdk", readonly), calls)
    }

    #[test]
    fn session_is_lazy_and_launched_once() {
        let (image, calls) = image(true, &[]);
        assert_eq!(image.disk_format(), DiskFormat::Vmdk);
        assert_eq!(calls.borrow().launches, 0);

        image.session().unwrap();
        image.session().unwrap();
        image.info().unwrap();
        assert_eq!(calls.borrow().launches, 1);
    }

    #[test]
    fn inspection_runs_once() {
        let (image, calls) = image(true, &[]);

        let first = image.info().unwrap().clone();
        let second = image.info().unwrap();
        assert_eq!(&first, second);
        assert_eq!(calls.borrow().inspections, 1);
    }

    #[test]
    fn mounts_shortest_first_and_ignores_failures() {
        let (image, calls) = image(false, &[]);

        image.mounted().unwrap();
        image.mounted().unwrap();

        let mounts = &calls.borrow().mounts;
        assert_eq!(
            mounts,
            &vec![("/".to_owned(), false), ("/var".to_owned(), false)]
        );
    }

    #[test]
    fn skips_mountpoints_already_mounted() {
        let (image, calls) = image(true, &["/"]);

        image.mounted().unwrap();

        assert_eq!(calls.borrow().mounts, vec![("/var".to_owned(), true)]);
    }
}
