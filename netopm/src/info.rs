/*
 * Side information providers handed to the states through the InfoCatalog.
 */

/*
 * Host paths fixed at deploy time, not carried by the NicClusterPolicy.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct StaticConfig {

    /* where CNI binaries are installed on the nodes */
    pub cni_bin_directory: String,
}

impl StaticConfig {

    pub fn new(cni_bin_directory: &str) -> Self {
	Self{ cni_bin_directory: cni_bin_directory.to_string() }
    }
}
