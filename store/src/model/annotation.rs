#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: String,
    pub name: String,
}

/// The three parent kinds an [`Annotation`] can be linked to (spec §4.5,
/// §9 "polymorphic annotation link table": three typed join tables rather
/// than one generic one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotatedKind {
    Cluster,
    Installation,
    Group,
}

impl AnnotatedKind {
    pub(crate) fn join_table(self) -> &'static str {
        match self {
            AnnotatedKind::Cluster => "ClusterAnnotation",
            AnnotatedKind::Installation => "InstallationAnnotation",
            AnnotatedKind::Group => "GroupAnnotation",
        }
    }

    pub(crate) fn parent_column(self) -> &'static str {
        match self {
            AnnotatedKind::Cluster => "ClusterID",
            AnnotatedKind::Installation => "InstallationID",
            AnnotatedKind::Group => "GroupID",
        }
    }
}
