use std::collections::{HashMap, HashSet};

/// Sentinel id bound to the empty/absent genre, matching `<NoGenre>` in the
/// catalog this was distilled from.
pub const NO_GENRE_ID: u32 = 0;
pub const NO_GENRE_NAME: &str = "<NoGenre>";

/// Bijective genre name <-> id table plus the grouping used to compute the
/// per-query genre distance (C3).
#[derive(Debug, Default)]
pub struct GenreModel {
    name_to_id: HashMap<String, u32>,
    id_to_name: Vec<String>,
    /// group index a genre id belongs to, if any (a genre is in at most one group)
    group_of: HashMap<u32, usize>,
    /// union of every genre id that appears in any configured group
    all_genres: HashSet<u32>,
    /// dense diff[g][h] table, built once all ids and groups are known
    diff: Vec<Vec<f32>>,
    /// members of each configured group, by group index, post name->id remap
    groups: Vec<HashSet<u32>>,
}

impl GenreModel {
    /// Starts with id 0 pre-bound to `<NoGenre>`, per I3.
    pub fn new() -> Self {
        let mut model = GenreModel {
            name_to_id: HashMap::new(),
            id_to_name: Vec::new(),
            group_of: HashMap::new(),
            all_genres: HashSet::new(),
            diff: Vec::new(),
            groups: Vec::new(),
        };
        model.id_to_name.push(NO_GENRE_NAME.to_string());
        model.name_to_id.insert(NO_GENRE_NAME.to_string(), NO_GENRE_ID);
        model
    }

    /// Returns the id for `name`, assigning a fresh one in encounter order if unseen.
    pub fn id_for(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.id_to_name.len() as u32;
        self.id_to_name.push(name.to_string());
        self.name_to_id.insert(name.to_string(), id);
        id
    }

    pub fn name_of(&self, id: u32) -> &str {
        self.id_to_name
            .get(id as usize)
            .map(|s| s.as_str())
            .unwrap_or(NO_GENRE_NAME)
    }

    pub fn num_genres(&self) -> usize {
        self.id_to_name.len()
    }

    /// Remaps configured genre-group names to ids, silently dropping unknown
    /// names, and builds the dense distance table. Must be called once, after
    /// every genre the catalog contains has been assigned an id.
    pub fn finalize_groups(&mut self, configured_groups: &[Vec<String>]) {
        self.group_of.clear();
        self.all_genres.clear();
        self.groups = vec![HashSet::new(); configured_groups.len()];

        for (group_idx, names) in configured_groups.iter().enumerate() {
            for name in names {
                if let Some(&id) = self.name_to_id.get(name) {
                    // A genre may belong to at most one group: first group wins.
                    let assigned_group = *self.group_of.entry(id).or_insert(group_idx);
                    if assigned_group == group_idx {
                        self.groups[group_idx].insert(id);
                    }
                    self.all_genres.insert(id);
                }
            }
        }

        self.build_diff_table();
    }

    fn build_diff_table(&mut self) {
        let n = self.num_genres();
        let mut diff = vec![vec![0.4f32; n]; n];
        for g in 0..n as u32 {
            let g_group = self.group_of.get(&g).copied();
            let g_in_all = self.all_genres.contains(&g);
            for h in 0..n as u32 {
                let value = if g == h {
                    0.1
                } else if g_group.is_some() && g_group == self.group_of.get(&h).copied() {
                    0.2
                } else if !g_in_all && !self.all_genres.contains(&h) {
                    0.2
                } else {
                    0.4
                };
                diff[g as usize][h as usize] = value;
            }
        }
        self.diff = diff;
    }

    /// `genre_diff[g][h]` in O(1); unknown ids default to the `<NoGenre>` row.
    pub fn diff(&self, g: u32, h: u32) -> f32 {
        let g = g as usize;
        let h = h as usize;
        if g < self.diff.len() && h < self.diff[g].len() {
            self.diff[g][h]
        } else {
            // An id never seen at load time can't occur by construction (I3),
            // but default to the <NoGenre> row rather than panic.
            self.diff
                .get(NO_GENRE_ID as usize)
                .and_then(|row| row.get(NO_GENRE_ID as usize))
                .copied()
                .unwrap_or(0.4)
        }
    }

    /// Union of every genre in a configured group touched by any of `ids`.
    /// Ungrouped ids contribute nothing. Used by the `filtergenre` discard
    /// check, which compares a candidate's primary genre against the union
    /// of groups touched by *any* genre of *any* seed (not just primaries).
    pub fn group_union_for_genres(&self, ids: &[u32]) -> HashSet<u32> {
        let mut out = HashSet::new();
        for id in ids {
            if let Some(&group_idx) = self.group_of.get(id) {
                if let Some(members) = self.groups.get(group_idx) {
                    out.extend(members.iter().copied());
                }
            }
        }
        out
    }
}
