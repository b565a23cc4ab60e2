use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Anat,
    Func,
    Dwi,
    NonBids(&'static str),
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Anat => f.write_str("anat"),
            Category::Func => f.write_str("func"),
            Category::Dwi => f.write_str("dwi"),
            Category::NonBids(subdir) => f.write_str(subdir),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member {
    Flat,
    Inner(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub category: Category,
    pub descriptor: &'static str,
}

#[derive(Debug)]
pub struct CatalogEntry {
    pub field_code: &'static str,
    pub title: &'static str,
    pub members: &'static [(Member, Placement)],
}

impl CatalogEntry {
    pub fn placement(&self, member: Member) -> Option<Placement> {
        self.members
            .iter()
            .find(|(candidate, _)| *candidate == member)
            .map(|(_, placement)| *placement)
    }
}

const fn bids(category: Category, descriptor: &'static str) -> Placement {
    Placement {
        category,
        descriptor,
    }
}

pub static CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        field_code: "20227",
        title: "Functional brain images - resting - NIFTI",
        members: &[
            (
                Member::Inner("fMRI/rfMRI.nii.gz"),
                bids(Category::Func, "task-rest_bold"),
            ),
            (
                Member::Inner("fMRI/rfMRI.json"),
                bids(Category::Func, "task-rest_bold"),
            ),
            (
                Member::Inner("fMRI/rfMRI_SBREF.nii.gz"),
                bids(Category::Func, "task-rest_sbref"),
            ),
            (
                Member::Inner("fMRI/rfMRI_SBREF.json"),
                bids(Category::Func, "task-rest_sbref"),
            ),
        ],
    },
    CatalogEntry {
        field_code: "20249",
        title: "Functional brain images - task - NIFTI",
        members: &[
            (
                Member::Inner("fMRI/tfMRI.nii.gz"),
                bids(Category::Func, "task-hariri_bold"),
            ),
            (
                Member::Inner("fMRI/tfMRI.json"),
                bids(Category::Func, "task-hariri_bold"),
            ),
            (
                Member::Inner("fMRI/tfMRI_SBREF.nii.gz"),
                bids(Category::Func, "task-hariri_sbref"),
            ),
            (
                Member::Inner("fMRI/tfMRI_SBREF.json"),
                bids(Category::Func, "task-hariri_sbref"),
            ),
        ],
    },
    CatalogEntry {
        field_code: "20250",
        title: "Multiband diffusion brain images - NIFTI",
        members: &[
            (
                Member::Inner("dMRI/raw/AP.nii.gz"),
                bids(Category::Dwi, "dir-AP_dwi"),
            ),
            (Member::Inner("dMRI/raw/AP.bval"), bids(Category::Dwi, "dir-AP_dwi")),
            (Member::Inner("dMRI/raw/AP.bvec"), bids(Category::Dwi, "dir-AP_dwi")),
            (Member::Inner("dMRI/raw/AP.json"), bids(Category::Dwi, "dir-AP_dwi")),
            (
                Member::Inner("dMRI/raw/PA.nii.gz"),
                bids(Category::Dwi, "dir-PA_dwi"),
            ),
            (Member::Inner("dMRI/raw/PA.bval"), bids(Category::Dwi, "dir-PA_dwi")),
            (Member::Inner("dMRI/raw/PA.bvec"), bids(Category::Dwi, "dir-PA_dwi")),
            (Member::Inner("dMRI/raw/PA.json"), bids(Category::Dwi, "dir-PA_dwi")),
        ],
    },
    CatalogEntry {
        field_code: "20252",
        title: "T1 structural brain images - NIFTI",
        members: &[
            (Member::Inner("T1/T1.nii.gz"), bids(Category::Anat, "T1w")),
            (Member::Inner("T1/T1.json"), bids(Category::Anat, "T1w")),
        ],
    },
    CatalogEntry {
        field_code: "20253",
        title: "T2 FLAIR structural brain images - NIFTI",
        members: &[
            (
                Member::Inner("T2_FLAIR/T2_FLAIR.nii.gz"),
                bids(Category::Anat, "FLAIR"),
            ),
            (
                Member::Inner("T2_FLAIR/T2_FLAIR.json"),
                bids(Category::Anat, "FLAIR"),
            ),
        ],
    },
    CatalogEntry {
        field_code: "25747",
        title: "fMRI task eprime file - advisory",
        members: &[(
            Member::Flat,
            bids(Category::NonBids("fMRI"), "task-hariri_eprime"),
        )],
    },
    CatalogEntry {
        field_code: "25748",
        title: "fMRI task eprime file",
        members: &[(
            Member::Flat,
            bids(Category::NonBids("fMRI"), "task-hariri_eprime"),
        )],
    },
];

pub fn lookup(field_code: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.field_code == field_code)
}
